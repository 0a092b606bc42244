//! File transfer over the `sync:` service
//!
//! After `host:transport:<serial>` and `sync:` are accepted, the connection
//! switches to binary sync framing:
//! ```text
//! [Id: 4 ASCII bytes][Length or value: u32 little-endian][payload...]
//! ```
//! A push is `SEND` (`<remote path>,<mode>`), any number of `DATA` chunks of at
//! most [`SYNC_DATA_MAX`] bytes, then `DONE` carrying the mtime. The device
//! answers `OKAY` or `FAIL` + message once the file is closed.

use crate::error::{ProtocolError, Result};

#[cfg(feature = "async")]
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Largest DATA chunk the device accepts
pub const SYNC_DATA_MAX: usize = 64 * 1024;

/// Longest remote path accepted by SEND
pub const SYNC_PATH_MAX: usize = 1024;

/// Regular file, rw-r--r--
pub const DEFAULT_FILE_MODE: u32 = 0o100644;

pub const ID_SEND: &[u8; 4] = b"SEND";
pub const ID_DATA: &[u8; 4] = b"DATA";
pub const ID_DONE: &[u8; 4] = b"DONE";
pub const ID_OKAY: &[u8; 4] = b"OKAY";
pub const ID_FAIL: &[u8; 4] = b"FAIL";
pub const ID_QUIT: &[u8; 4] = b"QUIT";

/// Encode an 8-byte sync header
pub fn encode_header(id: &[u8; 4], value: u32) -> [u8; 8] {
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(id);
    header[4..].copy_from_slice(&value.to_le_bytes());
    header
}

/// Encode a SEND request for `remote_path` with the given file mode
///
/// # Example
/// ```
/// use protocol::sync::encode_send_request;
///
/// let frame = encode_send_request("/data/local/tmp/a.apk", 0o100644).unwrap();
/// assert_eq!(&frame[..4], b"SEND");
/// assert!(frame.ends_with(b"/data/local/tmp/a.apk,33188"));
/// ```
pub fn encode_send_request(remote_path: &str, mode: u32) -> Result<Vec<u8>> {
    if remote_path.len() > SYNC_PATH_MAX {
        return Err(ProtocolError::PathTooLong {
            len: remote_path.len(),
            max: SYNC_PATH_MAX,
        });
    }

    let path_mode = format!("{},{}", remote_path, mode);
    let mut frame = Vec::with_capacity(8 + path_mode.len());
    frame.extend_from_slice(&encode_header(ID_SEND, path_mode.len() as u32));
    frame.extend_from_slice(path_mode.as_bytes());
    Ok(frame)
}

/// Encode one DATA chunk
pub fn encode_data_chunk(chunk: &[u8]) -> Result<Vec<u8>> {
    if chunk.len() > SYNC_DATA_MAX {
        return Err(ProtocolError::PayloadTooLarge {
            size: chunk.len(),
            max: SYNC_DATA_MAX,
        });
    }

    let mut frame = Vec::with_capacity(8 + chunk.len());
    frame.extend_from_slice(&encode_header(ID_DATA, chunk.len() as u32));
    frame.extend_from_slice(chunk);
    Ok(frame)
}

/// Async: push the whole of `source` to `remote_path` on an open sync stream
///
/// Returns the number of bytes sent.
#[cfg(feature = "async")]
pub async fn push<S, R>(
    stream: &mut S,
    source: &mut R,
    remote_path: &str,
    mode: u32,
    mtime: u32,
) -> Result<u64>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
    R: AsyncReadExt + Unpin,
{
    stream
        .write_all(&encode_send_request(remote_path, mode)?)
        .await?;

    let mut buffer = vec![0u8; SYNC_DATA_MAX];
    let mut total: u64 = 0;
    loop {
        let n = source.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&encode_data_chunk(&buffer[..n])?).await?;
        total += n as u64;
    }

    stream.write_all(&encode_header(ID_DONE, mtime)).await?;
    stream.flush().await?;

    read_sync_status(stream).await?;
    Ok(total)
}

/// Async: read the OKAY/FAIL reply that closes a sync operation
#[cfg(feature = "async")]
pub async fn read_sync_status<S>(stream: &mut S) -> Result<()>
where
    S: AsyncReadExt + Unpin,
{
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await?;
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    match &header[..4] {
        id if id == ID_OKAY => Ok(()),
        id if id == ID_FAIL => {
            let mut message = vec![0u8; length];
            stream.read_exact(&mut message).await?;
            Err(ProtocolError::Failed(
                String::from_utf8_lossy(&message).into_owned(),
            ))
        }
        other => Err(ProtocolError::UnexpectedStatus(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

/// Async: end the sync session
#[cfg(feature = "async")]
pub async fn quit<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWriteExt + Unpin,
{
    stream.write_all(&encode_header(ID_QUIT, 0)).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_little_endian() {
        let header = encode_header(ID_DATA, 0x0001_0000);
        assert_eq!(&header, b"DATA\x00\x00\x01\x00");
    }

    #[test]
    fn test_send_request_rejects_long_path() {
        let path = format!("/{}", "a".repeat(SYNC_PATH_MAX));
        assert!(matches!(
            encode_send_request(&path, DEFAULT_FILE_MODE),
            Err(ProtocolError::PathTooLong { .. })
        ));
    }

    #[test]
    fn test_data_chunk_limit() {
        assert!(encode_data_chunk(&vec![0u8; SYNC_DATA_MAX]).is_ok());
        assert!(encode_data_chunk(&vec![0u8; SYNC_DATA_MAX + 1]).is_err());
    }

    #[tokio::test]
    async fn test_push_splits_into_chunks() {
        let (mut host, mut device) = tokio::io::duplex(1024 * 1024);
        let content = vec![7u8; SYNC_DATA_MAX + 10];

        let device_side = tokio::spawn(async move {
            let mut header = [0u8; 8];
            device.read_exact(&mut header).await.unwrap();
            assert_eq!(&header[..4], ID_SEND);
            let len = u32::from_le_bytes(header[4..].try_into().unwrap()) as usize;
            let mut path_mode = vec![0u8; len];
            device.read_exact(&mut path_mode).await.unwrap();
            assert_eq!(path_mode, b"/data/local/tmp/x.apk,33188");

            let mut chunks = Vec::new();
            loop {
                device.read_exact(&mut header).await.unwrap();
                let value = u32::from_le_bytes(header[4..].try_into().unwrap()) as usize;
                if &header[..4] == ID_DONE {
                    assert_eq!(value, 42);
                    break;
                }
                assert_eq!(&header[..4], ID_DATA);
                let mut data = vec![0u8; value];
                device.read_exact(&mut data).await.unwrap();
                chunks.push(data.len());
            }
            device.write_all(&encode_header(ID_OKAY, 0)).await.unwrap();
            chunks
        });

        let mut source: &[u8] = &content;
        let sent = push(&mut host, &mut source, "/data/local/tmp/x.apk", DEFAULT_FILE_MODE, 42)
            .await
            .unwrap();

        assert_eq!(sent, content.len() as u64);
        let chunks = device_side.await.unwrap();
        assert_eq!(chunks.iter().sum::<usize>(), content.len());
        assert!(chunks.iter().all(|&c| c <= SYNC_DATA_MAX));
    }

    #[tokio::test]
    async fn test_sync_status_fail() {
        let mut reply = encode_header(ID_FAIL, 9).to_vec();
        reply.extend_from_slice(b"read-only");
        let mut reader: &[u8] = &reply;
        let err = read_sync_status(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Failed(ref m) if m == "read-only"));
    }
}
