//! Framed message channel between the bridge and a sandbox worker process.
//!
//! Frames are a 4-byte big-endian length followed by a JSON envelope, written
//! over the worker's stdin and stdout pipes.

use crate::SandboxConfig;
use mb_core::BridgeError;
use mb_core::BridgeResult;
use mb_core::PageSnapshot;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;

/// Hard ceiling for one framed message.
pub const HARD_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
const FRAME_PREFIX_BYTES: usize = 4;

/// Which side of the channel an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Host,
    Worker,
}

impl ChannelRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Worker => "worker",
        }
    }
}

/// Everything a worker needs to evaluate one analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub token: String,
    pub script_url: String,
    /// Rendered bootstrap, evaluated before `source`.
    pub bootstrap: String,
    pub source: String,
    pub limits: SandboxConfig,
}

/// Messages exchanged with the worker. The wire form is tagged JSON, so the
/// in-sandbox driver can produce `remote-result` replies itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SandboxMessage {
    Start {
        session: Box<SessionStart>,
    },
    Ready,
    LoadFailed {
        error: String,
    },
    RunAnalyze {
        token: String,
        snapshot: Box<PageSnapshot>,
    },
    RemoteResult {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Shutdown,
}

impl SandboxMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Ready => "ready",
            Self::LoadFailed { .. } => "load-failed",
            Self::RunAnalyze { .. } => "run-analyze",
            Self::RemoteResult { .. } => "remote-result",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub role: ChannelRole,
    pub max_message_bytes: usize,
}

impl ChannelConfig {
    pub fn new(role: ChannelRole, max_message_bytes: usize) -> BridgeResult<Self> {
        let config = Self {
            role,
            max_message_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.max_message_bytes == 0 {
            return Err(BridgeError::new(
                "channel.max_message_bytes_invalid",
                "channel max_message_bytes must be greater than zero",
            ));
        }

        if self.max_message_bytes > HARD_MAX_MESSAGE_BYTES {
            return Err(BridgeError::new(
                "channel.max_message_bytes_too_large",
                "channel max_message_bytes exceeds hard limit (16 MiB)",
            ));
        }

        Ok(())
    }
}

/// Writes frames to a pipe, flushing after each one.
#[derive(Debug)]
pub struct FramedWriter<W> {
    inner: W,
    config: ChannelConfig,
}

impl<W: Write> FramedWriter<W> {
    pub fn new(inner: W, config: ChannelConfig) -> Self {
        Self { inner, config }
    }

    pub fn send(&mut self, message: &SandboxMessage) -> BridgeResult<()> {
        let payload = serde_json::to_vec(message).map_err(|error| {
            BridgeError::new(
                "channel.encode_failed",
                format!("failed to encode `{}` message: {error}", message.kind()),
            )
        })?;
        self.send_raw(&payload)
    }

    /// Sends an already-encoded JSON payload.
    pub fn send_raw(&mut self, payload: &[u8]) -> BridgeResult<()> {
        let frame = encode_frame(payload, self.config.max_message_bytes)?;
        self.inner
            .write_all(&frame)
            .and_then(|()| self.inner.flush())
            .map_err(|error| {
                BridgeError::new(
                    "channel.closed",
                    format!(
                        "{} endpoint failed to write a frame: {error}",
                        self.config.role.as_str()
                    ),
                )
            })
    }
}

/// Reads frames from a pipe, checking the length prefix before allocating.
#[derive(Debug)]
pub struct FramedReader<R> {
    inner: R,
    config: ChannelConfig,
}

impl<R: Read> FramedReader<R> {
    pub fn new(inner: R, config: ChannelConfig) -> Self {
        Self { inner, config }
    }

    /// Next message, or `None` once the peer closes its end between frames.
    pub fn recv(&mut self) -> BridgeResult<Option<SandboxMessage>> {
        let mut prefix = [0_u8; FRAME_PREFIX_BYTES];
        match self.inner.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(self.read_failed(&error)),
        }

        let payload_len = checked_payload_len(prefix, self.config.max_message_bytes)?;
        let mut payload = vec![0_u8; payload_len];
        self.inner.read_exact(&mut payload).map_err(|error| {
            if error.kind() == ErrorKind::UnexpectedEof {
                BridgeError::new(
                    "channel.frame_length_mismatch",
                    format!("peer closed mid-frame; prefix promised {payload_len} bytes"),
                )
            } else {
                self.read_failed(&error)
            }
        })?;
        parse_message(&payload).map(Some)
    }

    fn read_failed(&self, error: &std::io::Error) -> BridgeError {
        BridgeError::new(
            "channel.closed",
            format!(
                "{} endpoint failed to read a frame: {error}",
                self.config.role.as_str()
            ),
        )
    }
}

/// Encodes a payload as a length-prefixed frame.
pub fn encode_frame(payload: &[u8], max_message_bytes: usize) -> BridgeResult<Vec<u8>> {
    if payload.len() > max_message_bytes {
        return Err(BridgeError::new(
            "channel.message_too_large",
            format!(
                "payload exceeds max_message_bytes ({} > {max_message_bytes})",
                payload.len()
            ),
        ));
    }

    let len_u32 = u32::try_from(payload.len()).map_err(|_| {
        BridgeError::new(
            "channel.message_too_large",
            "payload length does not fit in 32-bit frame prefix",
        )
    })?;

    let mut out = Vec::with_capacity(FRAME_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len_u32.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a complete length-prefixed frame and validates its size.
pub fn decode_frame(frame: &[u8], max_message_bytes: usize) -> BridgeResult<&[u8]> {
    let Some((prefix, payload)) = frame.split_first_chunk::<FRAME_PREFIX_BYTES>() else {
        return Err(BridgeError::new(
            "channel.frame_too_short",
            "frame is shorter than the 4-byte length prefix",
        ));
    };

    let payload_len = checked_payload_len(*prefix, max_message_bytes)?;
    if payload.len() != payload_len {
        return Err(BridgeError::new(
            "channel.frame_length_mismatch",
            format!(
                "frame length mismatch: prefix says {payload_len} bytes, got {}",
                payload.len()
            ),
        ));
    }

    Ok(payload)
}

pub fn decode_message(frame: &[u8], max_message_bytes: usize) -> BridgeResult<SandboxMessage> {
    parse_message(decode_frame(frame, max_message_bytes)?)
}

fn checked_payload_len(prefix: [u8; FRAME_PREFIX_BYTES], max_message_bytes: usize) -> BridgeResult<usize> {
    let payload_len = usize::try_from(u32::from_be_bytes(prefix)).unwrap_or(usize::MAX);
    if payload_len > max_message_bytes {
        return Err(BridgeError::new(
            "channel.message_too_large",
            format!("decoded payload exceeds max_message_bytes ({payload_len} > {max_message_bytes})"),
        ));
    }
    Ok(payload_len)
}

fn parse_message(payload: &[u8]) -> BridgeResult<SandboxMessage> {
    serde_json::from_slice(payload).map_err(|error| {
        BridgeError::new(
            "channel.message_invalid",
            format!("sandbox message is not a recognized envelope: {error}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::ChannelConfig;
    use super::ChannelRole;
    use super::FramedReader;
    use super::FramedWriter;
    use super::HARD_MAX_MESSAGE_BYTES;
    use super::SandboxMessage;
    use super::decode_frame;
    use super::decode_message;
    use super::encode_frame;
    use serde_json::json;
    use std::io::Cursor;

    fn config(role: ChannelRole, max: usize) -> ChannelConfig {
        ChannelConfig::new(role, max).unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn rejects_oversized_limits() {
        assert!(ChannelConfig::new(ChannelRole::Host, 0).is_err());
        assert!(ChannelConfig::new(ChannelRole::Host, HARD_MAX_MESSAGE_BYTES + 1).is_err());
        assert!(ChannelConfig::new(ChannelRole::Worker, HARD_MAX_MESSAGE_BYTES).is_ok());
    }

    #[test]
    fn frames_enforce_size_cap() {
        let encoded = encode_frame(b"hello", 5).unwrap_or_else(|_| unreachable!());
        assert_eq!(decode_frame(&encoded, 5), Ok(&b"hello"[..]));

        let too_big = encode_frame(b"hello", 4);
        assert!(too_big.is_err());
        if let Err(error) = too_big {
            assert_eq!(error.code, "channel.message_too_large");
        }

        let truncated = decode_frame(&encoded[..6], 64);
        assert!(truncated.is_err());
        if let Err(error) = truncated {
            assert_eq!(error.code, "channel.frame_length_mismatch");
        }
    }

    #[test]
    fn streams_carry_messages_until_the_peer_closes() {
        let mut writer = FramedWriter::new(Vec::new(), config(ChannelRole::Worker, 4096));
        assert!(writer.send(&SandboxMessage::Ready).is_ok());
        assert!(
            writer
                .send(&SandboxMessage::LoadFailed {
                    error: "boom".to_owned()
                })
                .is_ok()
        );

        let mut reader = FramedReader::new(Cursor::new(writer.inner), config(ChannelRole::Host, 4096));
        assert_eq!(reader.recv(), Ok(Some(SandboxMessage::Ready)));
        assert_eq!(
            reader.recv(),
            Ok(Some(SandboxMessage::LoadFailed {
                error: "boom".to_owned()
            }))
        );
        assert_eq!(reader.recv(), Ok(None));
    }

    #[test]
    fn oversized_prefix_is_refused_before_reading_the_body() {
        let mut stream = u32::MAX.to_be_bytes().to_vec();
        stream.extend_from_slice(b"{}");
        let mut reader = FramedReader::new(Cursor::new(stream), config(ChannelRole::Host, 64));
        let received = reader.recv();
        assert!(received.is_err());
        if let Err(error) = received {
            assert_eq!(error.code, "channel.message_too_large");
        }

        let mut cut = encode_frame(br#"{"type":"ready"}"#, 64).unwrap_or_else(|_| unreachable!());
        cut.truncate(8);
        let mut reader = FramedReader::new(Cursor::new(cut), config(ChannelRole::Host, 64));
        let received = reader.recv();
        assert!(received.is_err());
        if let Err(error) = received {
            assert_eq!(error.code, "channel.frame_length_mismatch");
        }
    }

    #[test]
    fn decodes_driver_replies() {
        let reply = json!({
            "type": "remote-result",
            "token": "ma-1-abc",
            "ok": true,
            "result": {"title": "X"},
        })
        .to_string();
        let frame = encode_frame(reply.as_bytes(), 4096).unwrap_or_else(|_| unreachable!());
        assert_eq!(
            decode_message(&frame, 4096),
            Ok(SandboxMessage::RemoteResult {
                token: Some("ma-1-abc".to_owned()),
                ok: true,
                result: json!({"title": "X"}),
                error: None,
            })
        );

        let frame = encode_frame(br#"{"type":"bogus"}"#, 4096).unwrap_or_else(|_| unreachable!());
        let decoded = decode_message(&frame, 4096);
        assert!(decoded.is_err());
        if let Err(error) = decoded {
            assert_eq!(error.code, "channel.message_invalid");
        }
    }
}
