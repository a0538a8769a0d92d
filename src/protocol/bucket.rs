//! Security-bucket codec.
//!
//! All handshake payloads travel as "buckets": typed, length-prefixed binary
//! containers concatenated into a buffer that is terminated by a reserved
//! `None` tag. A bucket's payload may itself be a nested buffer (the "main"
//! bucket), decoded recursively with the same truncation checks.
//!
//! This is an interoperability format, not an internal one: tag values and
//! field order are frozen. Every integer field is fixed-width, network byte
//! order. String payloads are explicit-length 7-bit-clean byte runs with no
//! NUL termination.

use thiserror::Error;

/// Hard ceiling on a single bucket payload. Not a wire commitment — a
/// defensive bound so a corrupt length field cannot drive allocation.
pub const PAYLOAD_MAX: usize = 64 * 1024;

/// Wire layout per bucket: u32 tag, u32 length, payload bytes.
const BUCKET_HDR_LEN: usize = 8;

/// Structural decode/encode failures. These map onto the wire as a generic
/// serialization error; the variant detail stays local.
#[derive(Debug, Error)]
pub enum BucketError {
    /// Input ended inside a header or payload.
    #[error("truncated bucket buffer at offset {0}")]
    Truncated(usize),
    /// Declared payload length exceeds the remaining input.
    #[error("bucket length {len} overruns remaining {remaining} bytes")]
    LengthOverrun { len: u32, remaining: usize },
    /// Declared payload length exceeds the defensive ceiling.
    #[error("bucket length {0} exceeds payload ceiling")]
    Oversized(u32),
    /// Tag code is not part of the bucket vocabulary.
    #[error("unknown bucket tag 0x{0:08x}")]
    UnknownTag(u32),
    /// Buffer ran out before the terminating `None` tag.
    #[error("bucket buffer missing terminator")]
    MissingTerminator,
    /// Bytes remained after the terminating `None` tag.
    #[error("trailing bytes after bucket terminator")]
    TrailingBytes,
    /// A required bucket is absent from a decoded buffer.
    #[error("required bucket {0:?} missing")]
    MissingBucket(BucketTag),
    /// A bucket payload did not parse as the expected shape.
    #[error("bucket {tag:?} payload invalid: {reason}")]
    BadPayload {
        tag: BucketTag,
        reason: &'static str,
    },
}

/// Bucket vocabulary. Wire values are interop-frozen: `None` terminates a
/// buffer, the 3000-range block carries the handshake fields.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketTag {
    None = 0,
    CryptoMod = 3000,
    Main = 3001,
    Puk = 3004,
    Rtag = 3006,
    SignedRtag = 3007,
    User = 3008,
    Version = 3014,
    ClntOpts = 3019,
    ErrorCode = 3020,
    Message = 3021,
    X509 = 3022,
    IssuerHash = 3023,
    X509Req = 3024,
    CipherAlg = 3025,
    MdAlg = 3026,
}

impl TryFrom<u32> for BucketTag {
    type Error = BucketError;
    fn try_from(v: u32) -> Result<Self, BucketError> {
        match v {
            0 => Ok(Self::None),
            3000 => Ok(Self::CryptoMod),
            3001 => Ok(Self::Main),
            3004 => Ok(Self::Puk),
            3006 => Ok(Self::Rtag),
            3007 => Ok(Self::SignedRtag),
            3008 => Ok(Self::User),
            3014 => Ok(Self::Version),
            3019 => Ok(Self::ClntOpts),
            3020 => Ok(Self::ErrorCode),
            3021 => Ok(Self::Message),
            3022 => Ok(Self::X509),
            3023 => Ok(Self::IssuerHash),
            3024 => Ok(Self::X509Req),
            3025 => Ok(Self::CipherAlg),
            3026 => Ok(Self::MdAlg),
            other => Err(BucketError::UnknownTag(other)),
        }
    }
}

/// One typed container: a tag plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityBucket {
    pub tag: BucketTag,
    pub payload: Vec<u8>,
}

impl SecurityBucket {
    pub fn new(tag: BucketTag, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }

    /// String-valued bucket (ASCII token, list, PEM blob).
    pub fn from_str_payload(tag: BucketTag, s: &str) -> Self {
        Self::new(tag, s.as_bytes().to_vec())
    }

    /// u32-valued bucket, network byte order.
    pub fn from_u32_payload(tag: BucketTag, v: u32) -> Self {
        Self::new(tag, v.to_be_bytes().to_vec())
    }
}

/// Encode a buffer: each bucket as tag/length/payload, then the bare `None`
/// terminator (no length field follows it).
#[must_use]
pub fn encode_buffer(buckets: &[SecurityBucket]) -> Vec<u8> {
    let total: usize = buckets
        .iter()
        .map(|b| BUCKET_HDR_LEN + b.payload.len())
        .sum();
    let mut out = Vec::with_capacity(total + 4);
    for b in buckets {
        out.extend_from_slice(&(b.tag as u32).to_be_bytes());
        out.extend_from_slice(&(b.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&b.payload);
    }
    out.extend_from_slice(&(BucketTag::None as u32).to_be_bytes());
    out
}

/// Decode a buffer. Exact inverse of [`encode_buffer`] for every value this
/// crate produces. Fails closed on truncation, overrunning or oversized
/// lengths, unknown tags, a missing terminator, and trailing bytes.
///
/// # Errors
/// Returns the specific [`BucketError`] variant; callers surface it to the
/// peer only as a generic serialization failure.
pub fn decode_buffer(input: &[u8]) -> Result<Vec<SecurityBucket>, BucketError> {
    let mut buckets = Vec::new();
    let mut off = 0usize;
    loop {
        if input.len() - off < 4 {
            return Err(BucketError::MissingTerminator);
        }
        let raw_tag = u32::from_be_bytes(input[off..off + 4].try_into().expect("4-byte slice"));
        off += 4;
        let tag = BucketTag::try_from(raw_tag)?;
        if tag == BucketTag::None {
            if off != input.len() {
                return Err(BucketError::TrailingBytes);
            }
            return Ok(buckets);
        }
        if input.len() - off < 4 {
            return Err(BucketError::Truncated(off));
        }
        let len = u32::from_be_bytes(input[off..off + 4].try_into().expect("4-byte slice"));
        off += 4;
        if len as usize > PAYLOAD_MAX {
            return Err(BucketError::Oversized(len));
        }
        let remaining = input.len() - off;
        if len as usize > remaining {
            return Err(BucketError::LengthOverrun { len, remaining });
        }
        let payload = input[off..off + len as usize].to_vec();
        off += len as usize;
        buckets.push(SecurityBucket { tag, payload });
    }
}

/// View over a decoded buffer with typed accessors for the handshake fields.
pub struct BucketBuffer<'a> {
    buckets: &'a [SecurityBucket],
}

impl<'a> BucketBuffer<'a> {
    pub fn new(buckets: &'a [SecurityBucket]) -> Self {
        Self { buckets }
    }

    /// First bucket with the given tag, if present.
    #[must_use]
    pub fn find(&self, tag: BucketTag) -> Option<&'a SecurityBucket> {
        self.buckets.iter().find(|b| b.tag == tag)
    }

    /// Raw payload of a required bucket.
    ///
    /// # Errors
    /// `BucketError::MissingBucket` when absent.
    pub fn bytes(&self, tag: BucketTag) -> Result<&'a [u8], BucketError> {
        self.find(tag)
            .map(|b| b.payload.as_slice())
            .ok_or(BucketError::MissingBucket(tag))
    }

    /// Required bucket interpreted as a UTF-8 token (7-bit-clean on the wire).
    ///
    /// # Errors
    /// `MissingBucket` when absent, `BadPayload` when not valid UTF-8.
    pub fn token(&self, tag: BucketTag) -> Result<&'a str, BucketError> {
        std::str::from_utf8(self.bytes(tag)?).map_err(|_| BucketError::BadPayload {
            tag,
            reason: "not valid UTF-8",
        })
    }

    /// Required bucket interpreted as a network-order u32.
    ///
    /// # Errors
    /// `MissingBucket` when absent, `BadPayload` on any other length.
    pub fn u32(&self, tag: BucketTag) -> Result<u32, BucketError> {
        let raw = self.bytes(tag)?;
        let arr: [u8; 4] = raw.try_into().map_err(|_| BucketError::BadPayload {
            tag,
            reason: "expected exactly 4 bytes",
        })?;
        Ok(u32::from_be_bytes(arr))
    }

    /// Required bucket whose payload is itself a nested buffer.
    ///
    /// # Errors
    /// `MissingBucket` when absent, or any structural error from the nested
    /// decode.
    pub fn nested(&self, tag: BucketTag) -> Result<Vec<SecurityBucket>, BucketError> {
        decode_buffer(self.bytes(tag)?)
    }
}
