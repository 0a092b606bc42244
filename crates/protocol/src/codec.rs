//! ADB host smart-socket framing
//!
//! Requests to the ADB server are a 4-digit lowercase hex length followed by
//! the ASCII service name:
//! ```text
//! [Length: 4 hex digits][service bytes]
//! ```
//!
//! Every request is answered by a 4-byte status. `OKAY` means the service was
//! accepted; `FAIL` is followed by a hex length-prefixed error message.
//! Query services (`host:version`, `host:devices-l`, `host:track-devices`)
//! then reply with one or more hex length-prefixed payloads.

use crate::error::{ProtocolError, Result};

#[cfg(feature = "async")]
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Largest payload expressible with a 4 hex digit length prefix
pub const MAX_PAYLOAD_SIZE: usize = 0xFFFF;

/// Size of a length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Accepted status word
pub const STATUS_OKAY: &[u8; 4] = b"OKAY";

/// Rejected status word
pub const STATUS_FAIL: &[u8; 4] = b"FAIL";

/// Server reply to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Okay,
    Fail(String),
}

/// Encode a service request with its hex length prefix
///
/// # Example
/// ```
/// use protocol::encode_request;
///
/// let frame = encode_request("host:version").unwrap();
/// assert_eq!(frame, b"000chost:version");
/// ```
pub fn encode_request(service: &str) -> Result<Vec<u8>> {
    encode_payload(service.as_bytes())
}

/// Prefix arbitrary bytes with their hex length
pub fn encode_payload(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(format!("{:04x}", payload.len()).as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode a 4 hex digit length prefix
///
/// Both upper and lower case digits are accepted; signs and whitespace are not.
pub fn decode_length(prefix: &[u8]) -> Result<usize> {
    if prefix.len() != LENGTH_PREFIX_SIZE || !prefix.iter().all(u8::is_ascii_hexdigit) {
        return Err(ProtocolError::InvalidLength(
            String::from_utf8_lossy(prefix).into_owned(),
        ));
    }

    // All bytes are ASCII hex digits, so this is valid UTF-8 and in range
    let text = std::str::from_utf8(prefix)
        .map_err(|_| ProtocolError::InvalidLength(String::from_utf8_lossy(prefix).into_owned()))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| ProtocolError::InvalidLength(text.to_string()))
}

/// Decode a length-prefixed payload held entirely in memory
///
/// Trailing bytes after the payload are ignored.
pub fn decode_payload(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::IncompleteFrame {
            expected: LENGTH_PREFIX_SIZE,
            actual: frame.len(),
        });
    }

    let length = decode_length(&frame[..LENGTH_PREFIX_SIZE])?;
    let end = LENGTH_PREFIX_SIZE + length;
    if frame.len() < end {
        return Err(ProtocolError::IncompleteFrame {
            expected: end,
            actual: frame.len(),
        });
    }

    Ok(&frame[LENGTH_PREFIX_SIZE..end])
}

/// Async: write a service request
#[cfg(feature = "async")]
pub async fn write_request<W>(writer: &mut W, service: &str) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let frame = encode_request(service)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Async: read a status word, and the failure message if the status is FAIL
#[cfg(feature = "async")]
pub async fn read_status<R>(reader: &mut R) -> Result<Status>
where
    R: AsyncReadExt + Unpin,
{
    let mut word = [0u8; 4];
    reader.read_exact(&mut word).await?;

    match &word {
        STATUS_OKAY => Ok(Status::Okay),
        STATUS_FAIL => {
            let message = read_payload(reader).await?;
            Ok(Status::Fail(String::from_utf8_lossy(&message).into_owned()))
        }
        other => Err(ProtocolError::UnexpectedStatus(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

/// Async: read a status and turn FAIL into an error
#[cfg(feature = "async")]
pub async fn expect_okay<R>(reader: &mut R) -> Result<()>
where
    R: AsyncReadExt + Unpin,
{
    match read_status(reader).await? {
        Status::Okay => Ok(()),
        Status::Fail(message) => Err(ProtocolError::Failed(message)),
    }
}

/// Async: read one hex length-prefixed payload
#[cfg(feature = "async")]
pub async fn read_payload<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncReadExt + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;
    let length = decode_length(&prefix)?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Async: read one length-prefixed payload as UTF-8 text
#[cfg(feature = "async")]
pub async fn read_payload_string<R>(reader: &mut R) -> Result<String>
where
    R: AsyncReadExt + Unpin,
{
    let payload = read_payload(reader).await?;
    Ok(String::from_utf8(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request() {
        assert_eq!(encode_request("host:version").unwrap(), b"000chost:version");
        assert_eq!(
            encode_request("host:transport:emulator-5554").unwrap(),
            b"001chost:transport:emulator-5554"
        );
    }

    #[test]
    fn test_encode_request_too_large() {
        let service = "x".repeat(MAX_PAYLOAD_SIZE + 1);
        assert!(matches!(
            encode_request(&service),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_length() {
        assert_eq!(decode_length(b"0000").unwrap(), 0);
        assert_eq!(decode_length(b"001c").unwrap(), 28);
        assert_eq!(decode_length(b"FFFF").unwrap(), 0xFFFF);
        assert!(decode_length(b"+01c").is_err());
        assert!(decode_length(b"zz01").is_err());
        assert!(decode_length(b"01").is_err());
    }

    #[test]
    fn test_decode_payload_incomplete() {
        assert!(matches!(
            decode_payload(b"0010abc"),
            Err(ProtocolError::IncompleteFrame {
                expected: 20,
                actual: 7
            })
        ));
        assert_eq!(decode_payload(b"0003abcdef").unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_read_status_okay() {
        let mut input: &[u8] = b"OKAY";
        assert_eq!(read_status(&mut input).await.unwrap(), Status::Okay);
    }

    #[tokio::test]
    async fn test_read_status_fail_with_message() {
        let mut input: &[u8] = b"FAIL0010device not found";
        let status = read_status(&mut input).await.unwrap();
        assert_eq!(status, Status::Fail("device not found".to_string()));

        let mut input: &[u8] = b"FAIL0010device not found";
        let err = expect_okay(&mut input).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Failed(ref m) if m == "device not found"));
    }

    #[tokio::test]
    async fn test_read_status_unexpected() {
        let mut input: &[u8] = b"WHAT";
        assert!(matches!(
            read_status(&mut input).await,
            Err(ProtocolError::UnexpectedStatus(_))
        ));
    }

    #[tokio::test]
    async fn test_write_request_then_read_payload() {
        let mut buffer = Vec::new();
        write_request(&mut buffer, "host:devices-l").await.unwrap();
        assert_eq!(buffer, b"000ehost:devices-l");

        let mut reader: &[u8] = &buffer;
        let payload = read_payload_string(&mut reader).await.unwrap();
        assert_eq!(payload, "host:devices-l");
    }
}
