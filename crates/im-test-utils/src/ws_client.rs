use futures_util::{SinkExt, StreamExt};
use im_protocol::{
    decode_server_frame, encode_client_frame, ClientPacket, DeviceType, Login, LoginResponse,
    ServerPacket,
};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send(
        &mut self,
        seq: &str,
        packet: &ClientPacket,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let json = encode_client_frame(seq, packet)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Send arbitrary text, bypassing the codec (for malformed-frame tests).
    pub async fn send_raw(&mut self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.write
            .send(Message::Text(text.to_owned().into()))
            .await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<(String, ServerPacket), Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let (seq, packet) = decode_server_frame(&text)?;
                    return Ok((seq, packet));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Receive with a deadline; an elapsed deadline is an error.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<(String, ServerPacket), Box<dyn std::error::Error>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err("timed out waiting for frame".into()),
        }
    }

    /// True when the server closed (or dropped) the connection before the
    /// deadline without sending another data frame.
    pub async fn closed_within(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.read.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }

    /// LOGIN and return the response body, panicking on unexpected frames.
    pub async fn login(
        &mut self,
        token: &str,
        device_id: &str,
        device_type: DeviceType,
    ) -> Result<LoginResponse, Box<dyn std::error::Error>> {
        self.send(
            "login-1",
            &ClientPacket::Login(Login {
                token: token.to_owned(),
                device_id: device_id.to_owned(),
                device_type,
            }),
        )
        .await?;
        match self.recv().await? {
            (_, ServerPacket::LoginResponse(resp)) => Ok(resp),
            (_, other) => Err(format!("expected LoginResponse, got {other:?}").into()),
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
