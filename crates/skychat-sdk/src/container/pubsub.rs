//! Pub/Sub 连接
//!
//! 一条 WebSocket 连接承载所有频道订阅，后台任务负责：
//! - 断线后按 `ReconnectPolicy` 重连并重新订阅
//! - 定时发送心跳
//! - 把 `{"channel": ..., "data": {...}}` 分发给对应频道的订阅者

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reconnect::ReconnectPolicy;
use super::PushPayload;
use crate::config::PubsubConfig;
use crate::error::{ChatSDKError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    Subscribe {
        id: u64,
        channel: String,
        sender: mpsc::UnboundedSender<PushPayload>,
    },
    Unsubscribe {
        id: u64,
    },
}

/// 共享的 Pub/Sub 连接
pub struct PubsubConnection {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl PubsubConnection {
    /// 启动后台连接任务（需要在 tokio 运行时内调用）
    pub fn spawn(url: Url, config: &PubsubConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = Worker {
            url,
            policy: config.reconnect.clone(),
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
            commands: receiver,
            channels: HashMap::new(),
            owners: HashMap::new(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(worker.run());

        Self {
            commands,
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// 订阅频道，`cancel` 触发后接收端结束
    pub fn subscribe(&self, channel: &str, cancel: CancellationToken) -> Result<mpsc::UnboundedReceiver<PushPayload>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Subscribe {
                id,
                channel: channel.to_string(),
                sender,
            })
            .map_err(|_| ChatSDKError::Transport("Pub/Sub 连接已关闭".to_string()))?;

        let commands = self.commands.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = commands.send(Command::Unsubscribe { id });
        });
        Ok(receiver)
    }

    /// 后台任务已退出（重连次数用尽），需要新建连接
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl Drop for PubsubConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<PushPayload>,
}

struct Worker {
    url: Url,
    policy: ReconnectPolicy,
    ping_interval: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    channels: HashMap<String, Vec<Subscriber>>,
    /// 订阅 ID -> 频道
    owners: HashMap<u64, String>,
    shutdown: CancellationToken,
}

/// 一次连接结束的原因
enum Disconnect {
    Shutdown,
    Lost(String),
}

/// 需要同步给服务端的频道变化
enum Change {
    Sub(String),
    Unsub(String),
}

impl Worker {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            let outcome = match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    info!("✅ Pub/Sub 已连接: {}", self.url.host_str().unwrap_or_default());
                    attempt = 0;
                    self.serve(stream).await
                }
                Err(e) => Disconnect::Lost(e.to_string()),
            };

            let reason = match outcome {
                Disconnect::Shutdown => break,
                Disconnect::Lost(reason) => reason,
            };
            if !self.policy.should_reconnect(attempt) {
                error!("❌ Pub/Sub 重连次数用尽，停止: {}", reason);
                break;
            }
            let delay = self.policy.delay_for(attempt);
            attempt += 1;
            warn!("⚠️ Pub/Sub 断开: {}，{:?} 后第 {} 次重连", reason, delay, attempt);
            if self.wait_offline(delay).await.is_err() {
                break;
            }
        }
        // 丢弃所有发送端，订阅者的接收端随之结束
        self.commands.close();
        self.channels.clear();
        debug!("Pub/Sub 后台任务退出");
    }

    /// 离线等待期间仍然处理订阅变更
    async fn wait_offline(&mut self, delay: Duration) -> std::result::Result<(), ()> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                _ = self.shutdown.cancelled() => return Err(()),
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.apply(command);
                    }
                    None => return Err(()),
                },
            }
        }
    }

    async fn serve(&mut self, mut stream: WsStream) -> Disconnect {
        for channel in self.channels.keys().cloned().collect::<Vec<_>>() {
            if let Err(e) = send_change(&mut stream, Change::Sub(channel)).await {
                return Disconnect::Lost(e);
            }
        }

        let mut ping = tokio::time::interval(self.ping_interval);
        ping.tick().await;

        loop {
            let changes: Vec<Change> = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = stream.close(None).await;
                    return Disconnect::Shutdown;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command).into_iter().collect(),
                    None => {
                        let _ = stream.close(None).await;
                        return Disconnect::Shutdown;
                    }
                },
                _ = ping.tick() => {
                    if let Err(e) = stream.send(WsMessage::Ping(Default::default())).await {
                        return Disconnect::Lost(e.to_string());
                    }
                    Vec::new()
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Disconnect::Lost("服务端关闭连接".to_string());
                    }
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(e)) => return Disconnect::Lost(e.to_string()),
                },
            };
            for change in changes {
                if let Err(e) = send_change(&mut stream, change).await {
                    return Disconnect::Lost(e);
                }
            }
        }
    }

    /// 首个订阅者加入或最后一个订阅者离开时返回需要同步的变化
    fn apply(&mut self, command: Command) -> Option<Change> {
        match command {
            Command::Subscribe { id, channel, sender } => {
                self.owners.insert(id, channel.clone());
                let subscribers = self.channels.entry(channel.clone()).or_default();
                subscribers.push(Subscriber { id, sender });
                debug!("订阅频道: {} (#{})", channel, id);
                (subscribers.len() == 1).then_some(Change::Sub(channel))
            }
            Command::Unsubscribe { id } => {
                let channel = self.owners.remove(&id)?;
                let subscribers = self.channels.get_mut(&channel)?;
                subscribers.retain(|s| s.id != id);
                if !subscribers.is_empty() {
                    return None;
                }
                self.channels.remove(&channel);
                debug!("取消订阅频道: {}", channel);
                Some(Change::Unsub(channel))
            }
        }
    }

    /// 分发推送；接收端都已关闭的频道返回退订
    fn dispatch(&mut self, text: &str) -> Vec<Change> {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("⚠️ 无法解析推送: {}", e);
                return Vec::new();
            }
        };
        let Some(channel) = frame.get("channel").and_then(Value::as_str) else {
            debug!("忽略没有频道的推送: {}", text);
            return Vec::new();
        };
        let payload = match frame.get("data") {
            Some(Value::Object(data)) => data.clone(),
            _ => return Vec::new(),
        };
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return Vec::new();
        };

        let owners = &mut self.owners;
        subscribers.retain(|subscriber| {
            let alive = subscriber.sender.send(payload.clone()).is_ok();
            if !alive {
                owners.remove(&subscriber.id);
            }
            alive
        });
        if !subscribers.is_empty() {
            return Vec::new();
        }
        self.channels.remove(channel);
        vec![Change::Unsub(channel.to_string())]
    }
}

async fn send_change(stream: &mut WsStream, change: Change) -> std::result::Result<(), String> {
    let (action, channel) = match change {
        Change::Sub(channel) => ("sub", channel),
        Change::Unsub(channel) => ("unsub", channel),
    };
    let frame = json!({ "action": action, "channel": channel }).to_string();
    stream
        .send(WsMessage::text(frame))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerStream = WebSocketStream<TcpStream>;

    async fn listen() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/pubsub", listener.local_addr().unwrap())).unwrap();
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerStream {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("timed out waiting for connection")
            .unwrap();
        accept_async(stream).await.unwrap()
    }

    /// 下一个文本帧（跳过心跳）
    async fn next_frame(server: &mut ServerStream) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), server.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn push(server: &mut ServerStream, frame: Value) {
        server.send(WsMessage::text(frame.to_string())).await.unwrap();
    }

    fn fast_reconnect(max_attempts: Option<u32>) -> PubsubConfig {
        PubsubConfig {
            reconnect: ReconnectPolicy {
                max_attempts,
                base_delay_ms: 10,
                max_delay_ms: 50,
                jitter_factor: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_subscribe_dispatch_and_unsubscribe() {
        let (listener, url) = listen().await;
        let connection = PubsubConnection::spawn(url, &PubsubConfig::default());
        let cancel = CancellationToken::new();
        let mut rx = connection.subscribe("ch-1", cancel.clone()).unwrap();

        let mut server = accept(&listener).await;
        assert_eq!(next_frame(&mut server).await, json!({ "action": "sub", "channel": "ch-1" }));

        push(&mut server, json!({ "channel": "ch-2", "data": { "n": 0 } })).await;
        push(&mut server, json!({ "data": { "n": -1 } })).await;
        push(&mut server, json!({ "channel": "ch-1", "data": { "n": 1 } })).await;
        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["n"], 1);

        cancel.cancel();
        assert_eq!(next_frame(&mut server).await, json!({ "action": "unsub", "channel": "ch-1" }));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_second_subscriber_shares_channel() {
        let (listener, url) = listen().await;
        let connection = PubsubConnection::spawn(url, &PubsubConfig::default());
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        let mut rx1 = connection.subscribe("ch-1", first.clone()).unwrap();
        let mut rx2 = connection.subscribe("ch-1", second.clone()).unwrap();

        let mut server = accept(&listener).await;
        assert_eq!(next_frame(&mut server).await, json!({ "action": "sub", "channel": "ch-1" }));

        // 第一个订阅者退出后频道仍在，推送只到第二个
        first.cancel();
        assert!(rx1.recv().await.is_none());
        push(&mut server, json!({ "channel": "ch-1", "data": { "n": 2 } })).await;
        assert_eq!(rx2.recv().await.unwrap()["n"], 2);

        second.cancel();
        assert_eq!(next_frame(&mut server).await, json!({ "action": "unsub", "channel": "ch-1" }));
    }

    #[tokio::test]
    async fn test_dropped_receiver_unsubscribes_on_next_push() {
        let (listener, url) = listen().await;
        let connection = PubsubConnection::spawn(url, &PubsubConfig::default());
        let rx = connection.subscribe("ch-1", CancellationToken::new()).unwrap();

        let mut server = accept(&listener).await;
        assert_eq!(next_frame(&mut server).await, json!({ "action": "sub", "channel": "ch-1" }));

        drop(rx);
        push(&mut server, json!({ "channel": "ch-1", "data": { "n": 1 } })).await;
        assert_eq!(next_frame(&mut server).await, json!({ "action": "unsub", "channel": "ch-1" }));
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_every_frame() {
        let (listener, url) = listen().await;
        let connection = PubsubConnection::spawn(url, &PubsubConfig::default());
        let cancel = CancellationToken::new();
        let mut rx = connection.subscribe("ch-1", cancel.clone()).unwrap();

        let mut server = accept(&listener).await;
        next_frame(&mut server).await;
        for n in 0..1000 {
            push(&mut server, json!({ "channel": "ch-1", "data": { "n": n } })).await;
        }
        for n in 0..1000 {
            let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(payload["n"], n);
        }
    }

    #[tokio::test]
    async fn test_resubscribes_after_reconnect() {
        let (listener, url) = listen().await;
        let connection = PubsubConnection::spawn(url, &fast_reconnect(None));
        let cancel = CancellationToken::new();
        let mut rx = connection.subscribe("ch-1", cancel.clone()).unwrap();

        let mut server = accept(&listener).await;
        assert_eq!(next_frame(&mut server).await, json!({ "action": "sub", "channel": "ch-1" }));
        server.close(None).await.unwrap();
        drop(server);

        let mut server = accept(&listener).await;
        assert_eq!(next_frame(&mut server).await, json!({ "action": "sub", "channel": "ch-1" }));
        push(&mut server, json!({ "channel": "ch-1", "data": { "n": 3 } })).await;
        assert_eq!(rx.recv().await.unwrap()["n"], 3);
    }

    #[tokio::test]
    async fn test_closed_after_attempts_exhausted() {
        let (listener, url) = listen().await;
        drop(listener);
        let connection = PubsubConnection::spawn(url, &fast_reconnect(Some(1)));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !connection.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let err = connection.subscribe("ch-1", CancellationToken::new()).unwrap_err();
        assert!(matches!(err, ChatSDKError::Transport(_)));
    }
}
