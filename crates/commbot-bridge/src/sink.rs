//! Sink workers — cooperative loops that drain one queue into a chat sink.
//!
//! Each pass drains without waiting until the queue is empty, beats the
//! heartbeat, sleeps the fixed interval and re-checks the enablement flag.
//! Those are the only suspension points besides the sends themselves.
//!
//! A failed delivery costs only its own envelope. It is logged (and, off the
//! alerts queue, surfaced to operators) and the drain moves on, so one bad
//! recipient can never take a sink down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use commbot_core::error::{BotError, FailureClass, Result};
use commbot_core::traits::{DeliveryLog, NotificationSink};
use commbot_core::types::{Destination, Envelope, Payload, QueueName};

use crate::context::Switch;
use crate::failure::{OperatorAlerts, WorkerTiming};
use crate::format::{self, Rendered};
use crate::heartbeat::HeartbeatRegistry;
use crate::queue::QueueReceiver;
use crate::source::WorkerExit;

/// Conversation id → the moderator who answered it last.
#[derive(Debug, Clone, Default)]
pub struct RecentResponders {
    inner: Arc<Mutex<HashMap<String, (String, DateTime<Utc>)>>>,
}

impl RecentResponders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, conversation_id: &str, moderator: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.insert(conversation_id.to_string(), (moderator.to_string(), Utc::now()));
    }

    pub fn last(&self, conversation_id: &str) -> Option<String> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.get(conversation_id).map(|(who, _)| who.clone())
    }

    /// Forget conversations nobody answered since `cutoff`.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.retain(|_, (_, at)| *at >= cutoff);
    }
}

/// Where each feed queue is delivered. Alerts carry their own destination.
#[derive(Debug, Clone, Default)]
pub struct SinkRoutes {
    routes: HashMap<QueueName, Destination>,
}

impl SinkRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `queue` to a channel; empty ids leave the queue unrouted.
    pub fn with_channel(mut self, queue: QueueName, channel_id: &str) -> Self {
        if !channel_id.is_empty() {
            self.routes
                .insert(queue, Destination::Channel(channel_id.to_string()));
        }
        self
    }

    pub fn destination_for(&self, envelope: &Envelope) -> Option<Destination> {
        match &envelope.payload {
            Payload::Alert(alert) => Some(alert.destination.clone()),
            _ => self.routes.get(&envelope.queue).cloned(),
        }
    }
}

pub struct SinkWorker {
    name: String,
    receiver: QueueReceiver,
    sink: Arc<dyn NotificationSink>,
    routes: SinkRoutes,
    responders: RecentResponders,
    log: Option<Arc<dyn DeliveryLog>>,
    heartbeats: Arc<HeartbeatRegistry>,
    operator: Option<OperatorAlerts>,
    switch: Switch,
    timing: WorkerTiming,
}

impl SinkWorker {
    pub fn new(
        receiver: QueueReceiver,
        sink: Arc<dyn NotificationSink>,
        routes: SinkRoutes,
        heartbeats: Arc<HeartbeatRegistry>,
        switch: Switch,
        timing: WorkerTiming,
    ) -> Self {
        Self {
            name: format!("sink:{}", receiver.name()),
            receiver,
            sink,
            routes,
            responders: RecentResponders::new(),
            log: None,
            heartbeats,
            operator: None,
            switch,
            timing,
        }
    }

    /// Surface unclassified delivery failures to operators. Leave unset on the
    /// alerts sink itself.
    pub fn with_operator(mut self, operator: OperatorAlerts) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_log(mut self, log: Arc<dyn DeliveryLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_responders(mut self, responders: RecentResponders) -> Self {
        self.responders = responders;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a single envelope.
    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let Some(destination) = self.routes.destination_for(envelope) else {
            tracing::debug!("[{}] no route for {}, dropping", self.name, envelope.queue);
            return Ok(());
        };

        let last_responder = match &envelope.payload {
            Payload::ModMail(item) if item.is_moderator => {
                self.responders.record(&item.conversation_id, &item.author);
                None
            }
            Payload::ModMail(item) => self.responders.last(&item.conversation_id),
            _ => None,
        };

        let rendered = format::render(envelope, last_responder.as_deref());
        match &rendered {
            Rendered::Text(text) => self.sink.send(&destination, text).await?,
            Rendered::Embed(embed) => self.sink.send_embed(&destination, embed).await?,
        }

        if let Some(log) = &self.log {
            let line = format!("{destination} {}", rendered.summary());
            if let Err(e) = log.append(envelope.queue.as_str(), &line).await {
                tracing::warn!("⚠️ [{}] delivery log append failed: {e}", self.name);
            }
        }
        Ok(())
    }

    /// Drain until empty. Returns how many envelopes were delivered.
    pub async fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(envelope) = self.receiver.try_pop() {
            match self.deliver(&envelope).await {
                Ok(()) => delivered += 1,
                Err(e) => self.skip(&envelope, &e).await,
            }
        }
        delivered
    }

    async fn skip(&self, envelope: &Envelope, err: &BotError) {
        match err.failure_class() {
            FailureClass::RateLimited => {
                tracing::warn!(
                    "⏳ [{}] rate limited, dropped {} item and cooling down for {}s: {err}",
                    self.name,
                    envelope.queue,
                    self.timing.rate_limit_cooldown.as_secs()
                );
                tokio::time::sleep(self.timing.rate_limit_cooldown).await;
            }
            FailureClass::Transient => {
                tracing::warn!("🌧️ [{}] dropped {} item: {err}", self.name, envelope.queue);
            }
            FailureClass::Unclassified => {
                tracing::error!(
                    worker = %self.name,
                    queue = %envelope.queue,
                    error = ?err,
                    "📭 Delivery failed, envelope dropped: {err}"
                );
                if let Some(op) = &self.operator {
                    op.send(format!("📭 `{}` dropped a {} item: {err}", self.name, envelope.queue));
                }
            }
        }
    }

    pub async fn run(mut self) -> WorkerExit {
        tracing::info!("📤 [{}] started via {}", self.name, self.sink.name());
        loop {
            if !self.switch.is_enabled() {
                tracing::info!("⏹️ [{}] disabled, exiting", self.name);
                return WorkerExit::Disabled;
            }
            self.drain().await;
            self.heartbeats.beat(&self.name);
            tokio::time::sleep(self.timing.sink_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueRegistry;
    use async_trait::async_trait;
    use commbot_core::error::BotError;
    use commbot_core::types::{Alert, Embed, ModMailItem};
    use std::time::Duration;

    /// Records every send; fails on messages containing "poison".
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(Destination, String)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, destination: &Destination, content: &str) -> Result<()> {
            if content.contains("poison") {
                return Err(BotError::channel("rejected"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((destination.clone(), content.to_string()));
            Ok(())
        }

        async fn send_embed(&self, destination: &Destination, embed: &Embed) -> Result<()> {
            self.send(destination, &embed.title).await
        }
    }

    #[derive(Default)]
    struct MemoryLog {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeliveryLog for MemoryLog {
        async fn append(&self, kind: &str, line: &str) -> Result<()> {
            self.lines.lock().unwrap().push(format!("{kind} {line}"));
            Ok(())
        }
    }

    fn timing() -> WorkerTiming {
        WorkerTiming {
            restart_interval: Duration::from_millis(1),
            rate_limit_cooldown: Duration::from_millis(1),
            transient_cooldown: Duration::from_millis(1),
            sink_interval: Duration::from_millis(1),
            crash_threshold: 5,
        }
    }

    fn alert(text: &str) -> Payload {
        Payload::Alert(Alert::new(text, Destination::Channel("ops".into())))
    }

    fn worker(queues: &QueueRegistry, name: QueueName, sink: Arc<RecordingSink>) -> SinkWorker {
        SinkWorker::new(
            queues.take_receiver(name).unwrap(),
            sink,
            SinkRoutes::new().with_channel(QueueName::ModMail, "mail-room"),
            Arc::default(),
            Switch::new(true),
            timing(),
        )
    }

    #[tokio::test]
    async fn test_drains_in_order_past_failures() {
        let queues = QueueRegistry::new();
        let tx = queues.sender(QueueName::Alerts);
        let sink = Arc::new(RecordingSink::default());
        let log = Arc::new(MemoryLog::default());
        let mut w = worker(&queues, QueueName::Alerts, sink.clone()).with_log(log.clone());

        for text in ["one", "poison two", "three", "four"] {
            tx.push(alert(text)).unwrap();
        }
        assert_eq!(w.drain().await, 3);

        let sent: Vec<String> = sink.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect();
        assert_eq!(sent, vec!["one", "three", "four"]);
        assert_eq!(log.lines.lock().unwrap().len(), 3);
        assert!(log.lines.lock().unwrap()[0].starts_with("alerts channel:ops one"));
    }

    #[tokio::test]
    async fn test_survives_undeliverable_envelopes() {
        let queues = QueueRegistry::new();
        let tx = queues.sender(QueueName::Alerts);
        let sink = Arc::new(RecordingSink::default());
        let mut w = worker(&queues, QueueName::Alerts, sink.clone());
        for _ in 0..10 {
            tx.push(alert("poison")).unwrap();
        }
        tx.push(alert("still here")).unwrap();

        assert_eq!(w.drain().await, 1);
        assert_eq!(w.receiver.len(), 0);
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "still here");
    }

    #[tokio::test]
    async fn test_failed_delivery_surfaced_to_operator() {
        let queues = QueueRegistry::new();
        let mut alerts = queues.take_receiver(QueueName::Alerts).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut w = worker(&queues, QueueName::Submissions, sink)
            .with_operator(OperatorAlerts::new(
                queues.sender(QueueName::Alerts),
                Destination::Channel("ops".into()),
            ));
        w.routes = SinkRoutes::new().with_channel(QueueName::Submissions, "feed");
        queues
            .sender(QueueName::Submissions)
            .push(Payload::Submission(commbot_core::types::FeedItem {
                id: "p1".into(),
                author: "alice".into(),
                title: Some("poison".into()),
                body: String::new(),
                permalink: "/p/p1".into(),
                created_utc: 0,
            }))
            .unwrap();

        assert_eq!(w.drain().await, 0);
        let env = alerts.try_pop().unwrap();
        match env.payload {
            Payload::Alert(alert) => {
                assert!(alert.message.contains("sink:submissions"));
                assert_eq!(alert.destination, Destination::Channel("ops".into()));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(alerts.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_unrouted_queue_is_dropped() {
        let queues = QueueRegistry::new();
        let sink = Arc::new(RecordingSink::default());
        let mut w = worker(&queues, QueueName::ModLog, sink.clone());
        queues
            .sender(QueueName::ModLog)
            .push(Payload::ModLog(commbot_core::types::ModLogItem {
                id: "1".into(),
                moderator: "m".into(),
                action: "ban".into(),
                target_author: None,
                details: None,
                created_utc: 0,
            }))
            .unwrap();
        assert_eq!(w.drain().await, 0);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_modmail_remembers_responder() {
        let queues = QueueRegistry::new();
        let tx = queues.sender(QueueName::ModMail);
        let sink = Arc::new(RecordingSink::default());
        let mut w = worker(&queues, QueueName::ModMail, sink.clone());

        let mail = |id: &str, author: &str, is_moderator: bool| {
            Payload::ModMail(ModMailItem {
                conversation_id: "conv".into(),
                message_id: id.into(),
                author: author.into(),
                subject: "appeal".into(),
                body: "text".into(),
                is_moderator,
                created_utc: 0,
            })
        };
        tx.push(mail("1", "carol", true)).unwrap();
        tx.push(mail("2", "bob", false)).unwrap();
        w.drain().await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0, Destination::Channel("mail-room".into()));
        assert!(sent[1].1.contains("last answered by u/carol"));
        assert!(!sent[0].1.contains("last answered"));
    }

    #[tokio::test]
    async fn test_run_exits_when_disabled() {
        let queues = QueueRegistry::new();
        let sink = Arc::new(RecordingSink::default());
        let w = worker(&queues, QueueName::Alerts, sink.clone());
        let switch = w.switch.clone();
        let heartbeats = w.heartbeats.clone();
        queues.sender(QueueName::Alerts).push(alert("hello")).unwrap();

        let task = tokio::spawn(w.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        switch.set(false);
        assert_eq!(task.await.unwrap(), WorkerExit::Disabled);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert!(heartbeats.last_seen("sink:alerts").is_some());
    }

    #[test]
    fn test_responders_prune() {
        let responders = RecentResponders::new();
        responders.record("c", "carol");
        responders.prune_before(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(responders.last("c"), None);
    }
}
