//! Subscription collector: a small state machine over a DDP session.
//!
//! ```text
//! Connecting ──connect──► Subscribing ──sub ×2──► Collecting ──► Done(StopReason)
//! ```
//!
//! While collecting, `added` frames populate two mappings (case metadata by
//! document id, item ranges by the `caseID` they describe) and `ready` frames
//! flip one readiness flag per subscription. Collection ends on the first of:
//!
//! - both subscriptions ready ([`StopReason::BothReady`])
//! - `max_messages` counted frames ([`StopReason::MaxMessages`])
//! - `max_idle_receives` consecutive empty/timed-out receives ([`StopReason::IdleReceives`])
//! - the peer closing the stream ([`StopReason::StreamClosed`])
//!
//! A `nosub` for the range subscription counts as that subscription being
//! ready, but also marks the collection as degraded so callers can tell
//! "no ranges because the upstream refused them" from a genuinely empty feed.
//!
//! All state lives in a [`CollectorContext`] owned by one call to
//! [`collect`]; nothing is shared between runs.

use std::collections::BTreeMap;

use cf_core::config::{FeedConfig, SubscriptionConfig};
use cf_core::error::CfError;
use cf_core::ws::FrameTransport;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::ddp::{self, Inbound};

/// Collection bounds and subscription names.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub cases_sub: SubscriptionConfig,
    pub ranges_sub: SubscriptionConfig,
    pub max_messages: usize,
    pub max_idle_receives: u32,
    pub protocol_versions: Vec<String>,
}

impl CollectorSettings {
    pub fn from_feed(feed: &FeedConfig) -> Self {
        Self {
            cases_sub: feed.effective_cases_sub(),
            ranges_sub: feed.effective_ranges_sub(),
            max_messages: feed.effective_max_messages(),
            max_idle_receives: feed.effective_max_idle_receives(),
            protocol_versions: feed.effective_protocol_versions(),
        }
    }
}

/// Why collection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BothReady,
    MaxMessages,
    IdleReceives,
    StreamClosed,
}

/// Collector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Subscribing,
    Collecting,
    Done(StopReason),
}

/// Raw documents gathered by one collection.
#[derive(Debug, Clone)]
pub struct Collection {
    /// Case metadata documents by case id.
    pub cases: BTreeMap<String, Map<String, Value>>,
    /// Item-range lists by case id.
    pub ranges: BTreeMap<String, Vec<Value>>,
    pub stop_reason: StopReason,
    /// The range subscription failed; cases carry no items.
    pub degraded: bool,
    /// Counted (decodable) frames.
    pub messages: usize,
}

/// Mutable state of one collection.
#[derive(Debug)]
pub struct CollectorContext {
    settings: CollectorSettings,
    phase: Phase,
    cases: BTreeMap<String, Map<String, Value>>,
    ranges: BTreeMap<String, Vec<Value>>,
    cases_ready: bool,
    ranges_ready: bool,
    degraded: bool,
    messages: usize,
    idle: u32,
}

impl CollectorContext {
    pub fn new(settings: CollectorSettings) -> Self {
        Self {
            settings,
            phase: Phase::Connecting,
            cases: BTreeMap::new(),
            ranges: BTreeMap::new(),
            cases_ready: false,
            ranges_ready: false,
            degraded: false,
            messages: 0,
            idle: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done(_))
    }

    /// Frames to send for the current handshake phase; advances the phase.
    ///
    /// Returns nothing once collecting.
    pub fn advance(&mut self) -> Vec<String> {
        match self.phase {
            Phase::Connecting => {
                self.phase = Phase::Subscribing;
                vec![ddp::build_connect(&self.settings.protocol_versions)]
            }
            Phase::Subscribing => {
                self.phase = Phase::Collecting;
                vec![ddp::build_sub(&self.settings.cases_sub), ddp::build_sub(&self.settings.ranges_sub)]
            }
            Phase::Collecting | Phase::Done(_) => Vec::new(),
        }
    }

    /// Feed one received frame. Returns a reply frame to send, if any.
    pub fn on_frame(&mut self, text: &str) -> Option<String> {
        if self.is_done() {
            return None;
        }
        self.idle = 0;

        let frame = match ddp::parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("[collector] skipping frame: {e}");
                return None;
            }
        };

        let reply = self.apply(frame);
        self.messages += 1;
        self.check_done();
        reply
    }

    /// Record an empty or timed-out receive.
    pub fn on_idle(&mut self) {
        if self.is_done() {
            return;
        }
        self.idle += 1;
        if self.idle >= self.settings.max_idle_receives {
            warn!("[collector] {} consecutive idle receives, finishing collection", self.idle);
            self.phase = Phase::Done(StopReason::IdleReceives);
        }
    }

    /// Record that the stream is gone.
    pub fn on_closed(&mut self) {
        if !self.is_done() {
            self.phase = Phase::Done(StopReason::StreamClosed);
        }
    }

    fn apply(&mut self, frame: Inbound) -> Option<String> {
        match frame {
            Inbound::Connected { session } => {
                info!("[collector] connected (session={})", session.as_deref().unwrap_or("-"));
                None
            }
            Inbound::Added { collection, id, fields } => {
                if collection == self.settings.cases_sub.name {
                    self.cases.insert(id, fields);
                } else if collection == self.settings.ranges_sub.name {
                    match fields.get("caseID").and_then(Value::as_str) {
                        Some(case_id) => {
                            let items = fields.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
                            self.ranges.insert(case_id.to_string(), items);
                        }
                        None => debug!("[collector] range document {id} without caseID"),
                    }
                }
                None
            }
            Inbound::Ready { subs } => {
                if subs.contains(&self.settings.cases_sub.id) {
                    self.cases_ready = true;
                    info!("[collector] cases ready: {} cases", self.cases.len());
                }
                if subs.contains(&self.settings.ranges_sub.id) {
                    self.ranges_ready = true;
                    info!("[collector] ranges ready: {} case ranges", self.ranges.len());
                }
                None
            }
            Inbound::Ping { id } => Some(ddp::build_pong(id.as_deref())),
            Inbound::NoSub { id, error } => {
                warn!("[collector] subscription failed: {id} ({})", error.as_deref().unwrap_or("no reason"));
                if id == self.settings.ranges_sub.id {
                    self.ranges_ready = true;
                    self.degraded = true;
                }
                None
            }
            Inbound::Other(_) => None,
        }
    }

    fn check_done(&mut self) {
        if self.cases_ready && self.ranges_ready {
            info!("[collector] both subscriptions ready, finishing collection");
            self.phase = Phase::Done(StopReason::BothReady);
        } else if self.messages >= self.settings.max_messages {
            warn!("[collector] message bound {} reached, finishing collection", self.settings.max_messages);
            self.phase = Phase::Done(StopReason::MaxMessages);
        }
    }

    /// Consume the context, yielding whatever was gathered.
    pub fn into_collection(self) -> Collection {
        let stop_reason = match self.phase {
            Phase::Done(reason) => reason,
            _ => StopReason::StreamClosed,
        };
        Collection {
            cases: self.cases,
            ranges: self.ranges,
            stop_reason,
            degraded: self.degraded,
            messages: self.messages,
        }
    }
}

/// Drive a full connect/subscribe/collect exchange over `transport`.
///
/// Fails only if the handshake frames cannot be sent. Once collecting, every
/// exit returns the partial data gathered so far.
pub async fn collect<T>(transport: &mut T, settings: &CollectorSettings) -> Result<Collection, CfError>
where
    T: FrameTransport + ?Sized,
{
    let mut ctx = CollectorContext::new(settings.clone());

    while matches!(ctx.phase(), Phase::Connecting | Phase::Subscribing) {
        for frame in ctx.advance() {
            transport.send(frame).await?;
        }
    }

    while !ctx.is_done() {
        match transport.recv().await {
            Ok(Some(text)) => {
                if let Some(reply) = ctx.on_frame(&text) {
                    if let Err(e) = transport.send(reply).await {
                        warn!("[collector] reply failed: {e}");
                        ctx.on_closed();
                    }
                }
            }
            Ok(None) | Err(CfError::Timeout(_)) => ctx.on_idle(),
            Err(e) => {
                debug!("[collector] receive ended: {e}");
                ctx.on_closed();
            }
        }
    }

    let collection = ctx.into_collection();
    info!(
        "[collector] collection complete: {} cases, {} ranges, {} messages, stop={:?}{}",
        collection.cases.len(),
        collection.ranges.len(),
        collection.messages,
        collection.stop_reason,
        if collection.degraded { " (degraded)" } else { "" },
    );
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    /// One scripted receive result.
    enum Step {
        Frame(&'static str),
        Empty,
        Timeout,
        Closed,
    }

    /// In-memory transport that replays a script and records sent frames.
    struct ScriptedTransport {
        script: VecDeque<Step>,
        sent: Vec<String>,
        recv_calls: usize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Step>) -> Self {
            Self { script: script.into(), sent: Vec::new(), recv_calls: 0 }
        }
    }

    #[async_trait]
    impl FrameTransport for ScriptedTransport {
        async fn send(&mut self, frame: String) -> Result<(), CfError> {
            self.sent.push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<String>, CfError> {
            self.recv_calls += 1;
            match self.script.pop_front() {
                Some(Step::Frame(text)) => Ok(Some(text.to_string())),
                Some(Step::Empty) => Ok(None),
                Some(Step::Timeout) => Err(CfError::Timeout(Duration::from_secs(30))),
                Some(Step::Closed) | None => Err(CfError::Closed),
            }
        }
    }

    fn settings() -> CollectorSettings {
        CollectorSettings {
            cases_sub: SubscriptionConfig { id: "cases-sub".into(), name: "cases".into() },
            ranges_sub: SubscriptionConfig { id: "ranges-sub".into(), name: "pf_case_ranges".into() },
            max_messages: 5000,
            max_idle_receives: 3,
            protocol_versions: vec!["1".into(), "pre2".into(), "pre1".into()],
        }
    }

    const CASE_A: &str = r#"{"msg":"added","collection":"cases","id":"a","fields":{"name":"Alpha","price":100,"price_usd":10}}"#;
    const CASE_B: &str = r#"{"msg":"added","collection":"cases","id":"b","fields":{"name":"Beta","price":50}}"#;
    const RANGES_A: &str = r#"{"msg":"added","collection":"pf_case_ranges","id":"r1","fields":{"caseID":"a","items":[{"name":"Knife (FN)","range":[1,100000],"price":9000,"price_usd":100}]}}"#;
    const READY_CASES: &str = r#"{"msg":"ready","subs":["cases-sub"]}"#;
    const READY_RANGES: &str = r#"{"msg":"ready","subs":["ranges-sub"]}"#;

    #[tokio::test]
    async fn handshake_frames_in_order() {
        let mut t = ScriptedTransport::new(vec![Step::Closed]);
        collect(&mut t, &settings()).await.unwrap();

        assert_eq!(t.sent.len(), 3);
        let connect: Value = serde_json::from_str(&t.sent[0]).unwrap();
        assert_eq!(connect["msg"], "connect");
        let sub_cases: Value = serde_json::from_str(&t.sent[1]).unwrap();
        assert_eq!(sub_cases["id"], "cases-sub");
        assert_eq!(sub_cases["name"], "cases");
        let sub_ranges: Value = serde_json::from_str(&t.sent[2]).unwrap();
        assert_eq!(sub_ranges["id"], "ranges-sub");
        assert_eq!(sub_ranges["name"], "pf_case_ranges");
    }

    #[tokio::test]
    async fn stops_when_both_ready() {
        let mut t = ScriptedTransport::new(vec![
            Step::Frame(r#"{"server_id":"0"}"#),
            Step::Frame(r#"{"msg":"connected","session":"s"}"#),
            Step::Frame(CASE_A),
            Step::Frame(CASE_B),
            Step::Frame(READY_CASES),
            Step::Frame(RANGES_A),
            Step::Frame(READY_RANGES),
            Step::Frame(CASE_A), // never read
        ]);
        let c = collect(&mut t, &settings()).await.unwrap();

        assert_eq!(c.stop_reason, StopReason::BothReady);
        assert!(!c.degraded);
        assert_eq!(c.cases.len(), 2);
        assert_eq!(c.ranges["a"].len(), 1);
        assert_eq!(c.messages, 7);
        assert_eq!(t.recv_calls, 7);
    }

    #[tokio::test]
    async fn ready_listing_both_subs_at_once() {
        let mut t = ScriptedTransport::new(vec![
            Step::Frame(CASE_A),
            Step::Frame(r#"{"msg":"ready","subs":["cases-sub","ranges-sub"]}"#),
        ]);
        let c = collect(&mut t, &settings()).await.unwrap();
        assert_eq!(c.stop_reason, StopReason::BothReady);
    }

    #[tokio::test]
    async fn nosub_for_ranges_ends_degraded_with_partial_data() {
        let mut t = ScriptedTransport::new(vec![
            Step::Frame(CASE_A),
            Step::Frame(READY_CASES),
            Step::Frame(r#"{"msg":"nosub","id":"ranges-sub","error":{"reason":"not allowed"}}"#),
            Step::Frame(CASE_B), // never read
        ]);
        let c = collect(&mut t, &settings()).await.unwrap();

        assert_eq!(c.stop_reason, StopReason::BothReady);
        assert!(c.degraded);
        assert_eq!(c.cases.len(), 1);
        assert!(c.ranges.is_empty());
    }

    #[tokio::test]
    async fn nosub_for_cases_keeps_waiting() {
        let mut t = ScriptedTransport::new(vec![
            Step::Frame(r#"{"msg":"nosub","id":"cases-sub"}"#),
            Step::Frame(READY_RANGES),
            Step::Timeout,
            Step::Timeout,
            Step::Timeout,
        ]);
        let c = collect(&mut t, &settings()).await.unwrap();
        assert_eq!(c.stop_reason, StopReason::IdleReceives);
        assert!(!c.degraded);
    }

    #[tokio::test]
    async fn answers_ping_with_pong() {
        let mut t = ScriptedTransport::new(vec![
            Step::Frame(r#"{"msg":"ping"}"#),
            Step::Frame(r#"{"msg":"ping","id":"42"}"#),
            Step::Closed,
        ]);
        collect(&mut t, &settings()).await.unwrap();

        assert_eq!(t.sent[3], r#"{"msg":"pong"}"#);
        let pong: Value = serde_json::from_str(&t.sent[4]).unwrap();
        assert_eq!(pong, serde_json::json!({"msg": "pong", "id": "42"}));
    }

    #[tokio::test]
    async fn stops_after_consecutive_idle_receives() {
        let mut t = ScriptedTransport::new(vec![
            Step::Frame(CASE_A),
            Step::Timeout,
            Step::Empty,
            Step::Frame(CASE_B), // resets the idle counter
            Step::Empty,
            Step::Timeout,
            Step::Timeout,
            Step::Frame(READY_CASES), // never read
        ]);
        let c = collect(&mut t, &settings()).await.unwrap();

        assert_eq!(c.stop_reason, StopReason::IdleReceives);
        assert_eq!(c.cases.len(), 2);
        assert_eq!(t.recv_calls, 7);
    }

    #[tokio::test]
    async fn stops_at_message_bound() {
        let mut s = settings();
        s.max_messages = 2;
        let mut t = ScriptedTransport::new(vec![Step::Frame(CASE_A), Step::Frame(CASE_B), Step::Frame(READY_CASES)]);
        let c = collect(&mut t, &s).await.unwrap();

        assert_eq!(c.stop_reason, StopReason::MaxMessages);
        assert_eq!(c.messages, 2);
        assert_eq!(t.recv_calls, 2);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped_and_not_counted() {
        let mut s = settings();
        s.max_messages = 2;
        let mut t = ScriptedTransport::new(vec![
            Step::Frame("garbage"),
            Step::Frame(r#"{"msg":"added","collection":"cases"}"#),
            Step::Frame(CASE_A),
            Step::Frame(CASE_B),
        ]);
        let c = collect(&mut t, &s).await.unwrap();
        assert_eq!(c.stop_reason, StopReason::MaxMessages);
        assert_eq!(c.cases.len(), 2);
    }

    #[tokio::test]
    async fn closed_stream_returns_partial_data() {
        let mut t = ScriptedTransport::new(vec![Step::Frame(CASE_A), Step::Closed]);
        let c = collect(&mut t, &settings()).await.unwrap();
        assert_eq!(c.stop_reason, StopReason::StreamClosed);
        assert_eq!(c.cases.len(), 1);
    }

    #[test]
    fn later_added_replaces_earlier_document() {
        let mut ctx = CollectorContext::new(settings());
        ctx.advance();
        ctx.advance();
        ctx.on_frame(CASE_A);
        ctx.on_frame(r#"{"msg":"added","collection":"cases","id":"a","fields":{"name":"Alpha v2"}}"#);
        ctx.on_frame(r#"{"msg":"added","collection":"pf_case_ranges","id":"r9","fields":{"items":[]}}"#);
        let c = ctx.into_collection();
        assert_eq!(c.cases["a"]["name"], "Alpha v2");
        assert!(c.ranges.is_empty());
    }

    #[test]
    fn phases_advance_in_order() {
        let mut ctx = CollectorContext::new(settings());
        assert_eq!(ctx.phase(), Phase::Connecting);
        assert_eq!(ctx.advance().len(), 1);
        assert_eq!(ctx.phase(), Phase::Subscribing);
        assert_eq!(ctx.advance().len(), 2);
        assert_eq!(ctx.phase(), Phase::Collecting);
        assert!(ctx.advance().is_empty());
        ctx.on_closed();
        assert_eq!(ctx.phase(), Phase::Done(StopReason::StreamClosed));
        // Done is terminal.
        ctx.on_idle();
        assert!(ctx.on_frame(CASE_A).is_none());
        assert_eq!(ctx.phase(), Phase::Done(StopReason::StreamClosed));
    }
}
