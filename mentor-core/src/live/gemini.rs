//! Gemini Live duplex transport over a blocking tungstenite WebSocket.
//!
//! One worker thread owns the socket. It alternates between draining the
//! outbound frame channel and a short-timeout read, so sends never wait on
//! inbound traffic and vice versa.

use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::http::HeaderValue;
use tungstenite::{Message, WebSocket};

use super::transport::{
    LiveConnector, LiveEvent, LiveLink, LiveSetup, MediaFrame, OUTPUT_SAMPLE_RATE,
};
use crate::buffering::chunk::AudioChunk;
use crate::codec;
use crate::error::{MentorError, Result};

const LIVE_HOST: &str = "generativelanguage.googleapis.com";
const LIVE_PATH: &str =
    "/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Read timeout once the session is running; bounds outbound latency.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

type Socket = WebSocket<native_tls::TlsStream<TcpStream>>;

pub struct GeminiLiveConnector {
    api_key: String,
    connect_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(api_key: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            connect_timeout,
        }
    }
}

impl LiveConnector for GeminiLiveConnector {
    fn connect(&self, setup: &LiveSetup, events: Sender<LiveEvent>) -> Result<Box<dyn LiveLink>> {
        let mut socket = open_socket(&self.api_key, self.connect_timeout)?;
        socket
            .send(Message::text(setup_message(setup).to_string()))
            .map_err(|e| MentorError::Connection(format!("setup: {e}")))?;
        socket.get_mut().get_mut().set_read_timeout(Some(POLL_INTERVAL))?;
        info!(model = setup.model.as_str(), voice = setup.voice.as_str(), "live setup sent");

        let (outbound_tx, outbound_rx) = unbounded();
        let worker = std::thread::Builder::new()
            .name("mentor-live".into())
            .spawn(move || run_socket(socket, outbound_rx, events))?;

        Ok(Box::new(GeminiLiveLink {
            outbound: outbound_tx,
            worker: Some(worker),
        }))
    }
}

enum Outbound {
    Frame(MediaFrame),
    Close,
}

struct GeminiLiveLink {
    outbound: Sender<Outbound>,
    worker: Option<JoinHandle<()>>,
}

impl LiveLink for GeminiLiveLink {
    fn send(&mut self, frame: MediaFrame) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| MentorError::Connection("live socket closed".into()))
    }

    fn close(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = self.outbound.send(Outbound::Close);
        worker
            .join()
            .map_err(|_| MentorError::Connection("live socket thread panicked".into()))
    }
}

impl Drop for GeminiLiveLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn open_socket(api_key: &str, timeout: Duration) -> Result<Socket> {
    let connection = |e: &dyn std::fmt::Display| MentorError::Connection(e.to_string());

    let addr = (LIVE_HOST, 443)
        .to_socket_addrs()
        .map_err(|e| connection(&e))?
        .next()
        .ok_or_else(|| MentorError::Connection(format!("could not resolve {LIVE_HOST}")))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| connection(&e))?;
    tcp.set_read_timeout(Some(timeout))?;
    tcp.set_write_timeout(Some(timeout))?;
    tcp.set_nodelay(true)?;

    let tls = native_tls::TlsConnector::new()
        .map_err(|e| connection(&e))?
        .connect(LIVE_HOST, tcp)
        .map_err(|e| connection(&e))?;

    let (socket, _response) =
        tungstenite::client::client(handshake_request(api_key)?, tls).map_err(|e| connection(&e))?;
    debug!(host = LIVE_HOST, "live websocket handshake complete");
    Ok(socket)
}

/// Upgrade request for the live endpoint. The key travels in a header so it
/// never appears in a URL or an error message.
fn handshake_request(api_key: &str) -> Result<Request> {
    let mut request = format!("wss://{LIVE_HOST}{LIVE_PATH}")
        .into_client_request()
        .map_err(|e| MentorError::Connection(e.to_string()))?;
    let key = HeaderValue::from_str(api_key)
        .map_err(|_| MentorError::Connection("api key is not a valid header value".into()))?;
    request.headers_mut().insert("x-goog-api-key", key);
    Ok(request)
}

fn run_socket(mut socket: Socket, outbound: Receiver<Outbound>, events: Sender<LiveEvent>) {
    loop {
        loop {
            match outbound.try_recv() {
                Ok(Outbound::Frame(frame)) => {
                    if let Err(e) = socket.send(Message::text(realtime_input(&frame).to_string())) {
                        let _ = events.send(LiveEvent::Error(format!("send: {e}")));
                        return;
                    }
                }
                Ok(Outbound::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    debug!("live socket closed locally");
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => forward(parse_server_message(text.as_str()), &events),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => forward(parse_server_message(text), &events),
                Err(_) => debug!(len = data.len(), "ignoring non-utf8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty());
                let _ = events.send(LiveEvent::Closed { reason });
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                let _ = events.send(LiveEvent::Closed { reason: None });
                return;
            }
            Err(e) => {
                let _ = events.send(LiveEvent::Error(e.to_string()));
                return;
            }
        }
    }
}

fn forward(parsed: Vec<LiveEvent>, events: &Sender<LiveEvent>) {
    for event in parsed {
        let _ = events.send(event);
    }
}

fn setup_message(setup: &LiveSetup) -> Value {
    json!({
        "setup": {
            "model": format!("models/{}", setup.model),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": setup.voice }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": setup.system_instruction }]
            }
        }
    })
}

fn realtime_input(frame: &MediaFrame) -> Value {
    json!({ "realtimeInput": { "mediaChunks": [frame] } })
}

/// Translate one server message into session events.
///
/// Unknown or unparsable messages yield nothing.
pub fn parse_server_message(text: &str) -> Vec<LiveEvent> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        debug!("ignoring non-json server message");
        return Vec::new();
    };

    let mut events = Vec::new();
    if value.get("setupComplete").is_some() {
        events.push(LiveEvent::Opened);
    }
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        events.push(LiveEvent::Error(message));
    }

    let Some(content) = value.get("serverContent") else {
        return events;
    };
    if let Some(parts) = content.pointer("/modelTurn/parts").and_then(Value::as_array) {
        for inline in parts.iter().filter_map(|p| p.get("inlineData")) {
            let Some(data) = inline.get("data").and_then(Value::as_str) else {
                continue;
            };
            let rate = inline
                .get("mimeType")
                .and_then(Value::as_str)
                .and_then(rate_from_mime)
                .unwrap_or(OUTPUT_SAMPLE_RATE);
            match codec::decode(data) {
                Ok(bytes) => events.push(LiveEvent::Audio(AudioChunk::new(bytes, rate))),
                Err(e) => warn!("dropping undecodable audio part: {e}"),
            }
        }
    }
    if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
        events.push(LiveEvent::Interrupted);
    }
    if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
        events.push(LiveEvent::TurnComplete);
    }
    events
}

fn rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_carries_the_key_in_a_header() {
        let request = handshake_request("SECRETKEY123").unwrap();
        assert!(!request.uri().to_string().contains("SECRETKEY123"));
        assert_eq!(request.headers()["x-goog-api-key"], "SECRETKEY123");
        assert!(handshake_request("bad\nkey").is_err());
    }

    #[test]
    fn setup_complete_opens_the_session() {
        assert_eq!(
            parse_server_message(r#"{"setupComplete": {}}"#),
            vec![LiveEvent::Opened]
        );
    }

    #[test]
    fn model_audio_parts_become_chunks() {
        let data = codec::encode(&[0, 0, 255, 127]);
        let msg = json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "text": "thinking" },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": data } }
                ]}
            }
        });
        let events = parse_server_message(&msg.to_string());
        assert_eq!(
            events,
            vec![LiveEvent::Audio(AudioChunk::new(vec![0, 0, 255, 127], 24_000))]
        );
    }

    #[test]
    fn interruption_and_turn_complete_are_reported() {
        let events = parse_server_message(
            r#"{"serverContent": {"interrupted": true, "turnComplete": true}}"#,
        );
        assert_eq!(events, vec![LiveEvent::Interrupted, LiveEvent::TurnComplete]);
    }

    #[test]
    fn garbage_is_ignored() {
        assert!(parse_server_message("not json").is_empty());
        assert!(parse_server_message(r#"{"usageMetadata": {}}"#).is_empty());
    }

    #[test]
    fn setup_message_carries_persona_and_voice() {
        let setup = LiveSetup {
            model: "gemini-live".into(),
            voice: "Kore".into(),
            system_instruction: "teach kindly".into(),
        };
        let msg = setup_message(&setup);
        assert_eq!(msg["setup"]["model"], "models/gemini-live");
        assert_eq!(
            msg["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(msg["setup"]["systemInstruction"]["parts"][0]["text"], "teach kindly");
    }

    #[test]
    fn realtime_input_wraps_the_frame() {
        let frame = MediaFrame {
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AAA=".into(),
        };
        let msg = realtime_input(&frame);
        assert_eq!(
            msg["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
    }

    #[test]
    fn mime_rate_is_parsed() {
        assert_eq!(rate_from_mime("audio/pcm;rate=16000"), Some(16_000));
        assert_eq!(rate_from_mime("audio/pcm"), None);
    }
}
