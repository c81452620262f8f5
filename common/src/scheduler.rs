use std::{
    fmt, io, thread,
    time::{Duration, Instant},
};

use chrono::{Timelike, Utc};
use tracing::{debug, info, warn};

use crate::{
    command::Command,
    config::LoopConfig,
    error::CommandError,
    reassembler::FragmentReassembler,
    state::ControllerState,
    storage::Storage,
    transport::{SerialLink, TransportAdapter},
};

/// Upper bound on inbound items drained from one source per iteration.
const MAX_INBOUND_PER_ITERATION: usize = 32;

pub trait Clock {
    /// Monotonic time for interval gates and fragment timeouts.
    fn monotonic(&self) -> Instant;

    /// Wall-clock seconds since midnight, in `[0, 86400)`.
    fn seconds_of_day(&self) -> f64;
}

/// Host clock. Time of day is UTC epoch time modulo one day; the device
/// clock is not assumed to be synchronized.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn seconds_of_day(&self) -> f64 {
        let now = Utc::now();
        f64::from(now.num_seconds_from_midnight()) + f64::from(now.nanosecond()) / 1e9
    }
}

/// Short-range wireless link delivering raw write fragments.
pub trait WirelessLink {
    /// Next pending fragment, `Ok(None)` when nothing is waiting.
    fn poll_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Sends `payload` back to whoever wrote last.
    fn send(&mut self, payload: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpReply {
    Ok,
    BadRequest(String),
}

impl HttpReply {
    pub fn body(&self) -> &str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest(message) => message,
        }
    }
}

/// A `POST /command` body waiting for the loop, plus the way back to the client.
pub struct HttpCommand {
    pub body: Vec<u8>,
    reply: Box<dyn FnOnce(HttpReply) + Send>,
}

impl HttpCommand {
    pub fn new(body: Vec<u8>, reply: impl FnOnce(HttpReply) + Send + 'static) -> Self {
        Self {
            body,
            reply: Box::new(reply),
        }
    }

    pub fn respond(self, reply: HttpReply) {
        (self.reply)(reply);
    }
}

impl fmt::Debug for HttpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCommand")
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish_non_exhaustive()
    }
}

pub trait CommandInbox {
    /// Next queued request, `None` when nothing is waiting.
    fn try_next(&mut self) -> Option<HttpCommand>;
}

/// The cooperative control loop.
///
/// Owns the controller state; every command is applied and every profile
/// evaluated from the same thread, so an update is never observed half-done.
pub struct Scheduler<S, L, C> {
    state: ControllerState,
    storage: S,
    transport: TransportAdapter<L>,
    reassembler: FragmentReassembler,
    clock: C,
    check_interval: Duration,
    last_evaluation: Option<Instant>,
}

impl<S: Storage, L: SerialLink, C: Clock> Scheduler<S, L, C> {
    pub fn new(config: &LoopConfig, storage: S, transport: TransportAdapter<L>, clock: C) -> Self {
        let state = ControllerState::load(&storage);
        info!(
            "restored state: running={}, color={}, {} channel profile(s)",
            state.running,
            state.grow_light_color,
            state.profiles.len()
        );

        Self {
            state,
            storage,
            transport,
            reassembler: FragmentReassembler::new(
                config.reassembly_timeout(),
                config.max_message_bytes,
            ),
            clock,
            check_interval: config.profile_check_interval(),
            last_evaluation: None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn transport(&self) -> &TransportAdapter<L> {
        &self.transport
    }

    /// Runs the profile evaluation when the schedule is running and the
    /// check interval has elapsed. Returns whether an evaluation ran.
    pub fn tick(&mut self) -> bool {
        if !self.state.running {
            return false;
        }

        let now = self.clock.monotonic();
        if let Some(last) = self.last_evaluation {
            if now.saturating_duration_since(last) < self.check_interval {
                return false;
            }
        }

        self.evaluate_profiles();
        self.last_evaluation = Some(now);
        true
    }

    /// Evaluates every channel at the current time of day and forwards the
    /// values to the driver.
    pub fn evaluate_profiles(&mut self) {
        let t = self.clock.seconds_of_day();
        debug!("evaluating {} profile(s) at t={t:.0}s", self.state.profiles.len());

        for (&channel, profile) in &self.state.profiles {
            let value = profile.evaluate(t);
            info!("channel {channel} value: {value}");
            if !channel.is_transmitted() {
                continue;
            }
            if let Err(err) = self
                .transport
                .transmit(channel, value, self.state.grow_light_color)
            {
                warn!("serial exchange for {channel} failed: {err}");
            }
        }
    }

    pub fn process_command(&mut self, input: &str) -> Result<(), CommandError> {
        info!("processing command: {input}");
        let command = Command::parse(input)?;
        command.apply(&mut self.state, &mut self.storage)
    }

    /// Feeds one wireless fragment. Returns the error echo for the sender
    /// when a completed message was rejected.
    pub fn on_wireless_chunk(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        let now = self.clock.monotonic();
        let outcome = match self.reassembler.on_chunk(chunk, now) {
            Ok(Some(message)) => self.process_command(&message),
            Ok(None) => return None,
            Err(err) => Err(err),
        };

        outcome.err().map(|err| {
            warn!("error processing wireless command: {err}");
            format!("Error: {err}\n").into_bytes()
        })
    }

    pub fn on_http_body(&mut self, body: &[u8]) -> HttpReply {
        if body.is_empty() {
            return HttpReply::BadRequest("No payload".to_string());
        }

        let outcome = std::str::from_utf8(body)
            .map_err(|_| CommandError::InvalidEncoding)
            .and_then(|input| self.process_command(input));

        match outcome {
            Ok(()) => HttpReply::Ok,
            Err(err) => {
                warn!("error processing http command: {err}");
                HttpReply::BadRequest(format!("Error: {err}"))
            }
        }
    }

    /// One pass of the loop: periodic evaluation, then inbound pumping.
    /// Never blocks beyond the serial settle time.
    pub fn run_iteration(
        &mut self,
        wireless: Option<&mut dyn WirelessLink>,
        inbox: Option<&mut dyn CommandInbox>,
    ) {
        self.tick();

        if let Some(link) = wireless {
            self.pump_wireless(link);
        }
        if let Some(inbox) = inbox {
            self.pump_http(inbox);
        }
    }

    pub fn run_forever(
        mut self,
        mut wireless: Option<&mut dyn WirelessLink>,
        mut inbox: Option<&mut dyn CommandInbox>,
        delay: Duration,
    ) -> ! {
        info!("control loop started");
        loop {
            self.run_iteration(
                wireless
                    .as_mut()
                    .map(|link| &mut **link as &mut dyn WirelessLink),
                inbox
                    .as_mut()
                    .map(|inbox| &mut **inbox as &mut dyn CommandInbox),
            );
            thread::sleep(delay);
        }
    }

    fn pump_wireless(&mut self, link: &mut dyn WirelessLink) {
        for _ in 0..MAX_INBOUND_PER_ITERATION {
            let chunk = match link.poll_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return,
                Err(err) => {
                    warn!("wireless receive failed: {err}");
                    return;
                }
            };

            debug!("wireless received {} bytes", chunk.len());
            if let Some(echo) = self.on_wireless_chunk(&chunk) {
                if let Err(err) = link.send(&echo) {
                    warn!("failed to echo error over wireless: {err}");
                }
            }
        }
    }

    fn pump_http(&mut self, inbox: &mut dyn CommandInbox) {
        for _ in 0..MAX_INBOUND_PER_ITERATION {
            let Some(request) = inbox.try_next() else {
                return;
            };
            let reply = self.on_http_body(&request.body);
            request.respond(reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
        rc::Rc,
        sync::{Arc, Mutex},
    };

    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;
    use crate::{
        channel::Channel,
        state::{GrowLightColor, KEY_RUN_PROFILE},
        storage::MemoryStore,
    };

    #[derive(Clone)]
    struct ManualClock {
        now: Rc<Cell<Instant>>,
        seconds_of_day: Rc<Cell<f64>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Rc::new(Cell::new(Instant::now())),
                seconds_of_day: Rc::new(Cell::new(0.0)),
            }
        }

        fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn monotonic(&self) -> Instant {
            self.now.get()
        }

        fn seconds_of_day(&self) -> f64 {
            self.seconds_of_day.get()
        }
    }

    #[derive(Default)]
    struct RecordingLink {
        lines: Vec<Value>,
        broken_channel: Option<&'static str>,
    }

    impl RecordingLink {
        fn channels(&self) -> Vec<String> {
            self.lines
                .iter()
                .map(|line| line["channel"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    impl SerialLink for RecordingLink {
        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            assert_eq!(bytes.last(), Some(&b'\n'));
            let line: Value = serde_json::from_slice(bytes).map_err(io::Error::other)?;
            if self.broken_channel.is_some_and(|channel| line["channel"] == channel) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "driver unplugged"));
            }
            self.lines.push(line);
            Ok(())
        }

        fn read_available(&mut self, _max: usize) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct ScriptedWireless {
        inbound: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl WirelessLink for ScriptedWireless {
        fn poll_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.inbound.pop_front())
        }

        fn send(&mut self, payload: &[u8]) -> io::Result<()> {
            self.sent.push(payload.to_vec());
            Ok(())
        }
    }

    struct DeadWireless;

    impl WirelessLink for DeadWireless {
        fn poll_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "radio down"))
        }

        fn send(&mut self, _payload: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "radio down"))
        }
    }

    #[derive(Default)]
    struct QueueInbox {
        queue: VecDeque<HttpCommand>,
    }

    impl CommandInbox for QueueInbox {
        fn try_next(&mut self) -> Option<HttpCommand> {
            self.queue.pop_front()
        }
    }

    type TestScheduler = Scheduler<MemoryStore, RecordingLink, ManualClock>;

    fn scheduler_with(store: MemoryStore, clock: &ManualClock) -> TestScheduler {
        let transport = TransportAdapter::new(RecordingLink::default(), Duration::ZERO, 100);
        Scheduler::new(&LoopConfig::default(), store, transport, clock.clone())
    }

    fn scheduler(clock: &ManualClock) -> TestScheduler {
        scheduler_with(MemoryStore::new(), clock)
    }

    #[test]
    fn starts_stopped_and_does_not_evaluate() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);
        scheduler
            .process_command(r#"POINTS_PROFILE:{"light":[[0.0,1.0]]}"#)
            .unwrap();

        assert!(!scheduler.state().running);
        assert!(!scheduler.tick());
        assert!(scheduler.transport().link().lines.is_empty());
    }

    #[test]
    fn evaluates_on_interval_once_running() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);
        scheduler
            .process_command(r#"POINTS_PROFILE:{"aerator":[[0.0,1.0]]}"#)
            .unwrap();
        scheduler.process_command("START").unwrap();

        assert!(scheduler.tick());
        assert!(!scheduler.tick());

        clock.advance(Duration::from_millis(9_999));
        assert!(!scheduler.tick());

        clock.advance(Duration::from_millis(1));
        assert!(scheduler.tick());
        assert_eq!(scheduler.transport().link().lines.len(), 2);
    }

    #[test]
    fn light_is_sent_as_scaled_color() {
        let clock = ManualClock::new();
        clock.seconds_of_day.set(100.0);
        let mut scheduler = scheduler(&clock);
        scheduler.process_command("GROW_LIGHT_COLOR:200,100,50").unwrap();
        scheduler
            .process_command(r#"POINTS_PROFILE:{"light":[[0.0,0.5],[43200.0,1.0]]}"#)
            .unwrap();
        scheduler.process_command("START").unwrap();

        scheduler.tick();

        let lines = &scheduler.transport().link().lines;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["channel"], "light");
        assert_eq!(lines[0]["value"], "100,50,25");
    }

    #[test]
    fn humidifier_is_evaluated_but_never_transmitted() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);
        scheduler
            .process_command(
                r#"POINTS_PROFILE:{"humidifier":[[0.0,1.0]],"fan_out":[[0.0,0.3]]}"#,
            )
            .unwrap();
        scheduler.process_command("START").unwrap();

        assert!(scheduler.tick());
        assert_eq!(scheduler.transport().link().channels(), vec!["fan_out"]);
    }

    #[test]
    fn wireless_fragments_are_reassembled_and_applied() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);
        let mut wireless = ScriptedWireless::default();
        wireless.inbound.extend([b"GROW_LIGHT_".to_vec(), b"COLOR:1,2,3\n".to_vec()]);

        scheduler.run_iteration(Some(&mut wireless), None);

        assert_eq!(scheduler.state().grow_light_color, GrowLightColor::new(1, 2, 3));
        assert!(wireless.sent.is_empty());
    }

    #[test]
    fn wireless_errors_are_echoed_and_loop_keeps_going() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);
        let mut wireless = ScriptedWireless::default();
        wireless.inbound.extend([b"BOGUS\n".to_vec(), b"START\n".to_vec()]);

        scheduler.run_iteration(Some(&mut wireless), None);

        assert_eq!(wireless.sent, vec![b"Error: Invalid command: BOGUS\n".to_vec()]);
        assert!(scheduler.state().running);
    }

    #[test]
    fn stale_wireless_fragment_is_not_glued_to_the_next_message() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);

        assert_eq!(scheduler.on_wireless_chunk(b"GROW_LIGHT_COLOR:9,9,9"), None);
        clock.advance(Duration::from_secs(2));
        assert_eq!(scheduler.on_wireless_chunk(b"START\n"), None);

        assert!(scheduler.state().running);
        assert_eq!(scheduler.state().grow_light_color, GrowLightColor::default());
    }

    #[test]
    fn http_bodies_are_answered() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);
        let replies = Arc::new(Mutex::new(Vec::new()));
        let mut inbox = QueueInbox::default();
        let bodies: [&[u8]; 4] = [b"START", b"", b"BOGUS", b"GROW_LIGHT_COLOR:1,2"];
        for body in bodies {
            let replies = Arc::clone(&replies);
            inbox.queue.push_back(HttpCommand::new(body.to_vec(), move |reply| {
                replies.lock().unwrap().push(reply);
            }));
        }

        scheduler.run_iteration(None, Some(&mut inbox));

        assert_eq!(
            *replies.lock().unwrap(),
            vec![
                HttpReply::Ok,
                HttpReply::BadRequest("No payload".to_string()),
                HttpReply::BadRequest("Error: Invalid command: BOGUS".to_string()),
                HttpReply::BadRequest("Error: Invalid grow light color: 1,2".to_string()),
            ]
        );
        assert!(scheduler.state().running);
    }

    #[test]
    fn state_survives_restart_through_storage() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);
        scheduler.process_command("START").unwrap();
        scheduler.process_command("GROW_LIGHT_COLOR:5,6,7").unwrap();
        scheduler
            .process_command(r#"FUNC_PROFILE:{"light":{"a":"1","b":"1","c":"0","k":"2","n":"2"}}"#)
            .unwrap();
        assert_eq!(scheduler.storage().get(KEY_RUN_PROFILE), Some("true"));

        let restarted = scheduler_with(scheduler.storage().clone(), &clock);
        assert_eq!(restarted.state(), scheduler.state());
        assert!(restarted.state().profiles.contains_key(&Channel::Light));
    }

    #[test]
    fn rejected_profile_does_not_disturb_running_schedule() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);
        scheduler
            .process_command(r#"POINTS_PROFILE:{"fan_in":[[0.0,0.7]]}"#)
            .unwrap();
        scheduler.process_command("START").unwrap();

        let echo = scheduler
            .on_wireless_chunk(b"POINTS_PROFILE:{\"fan_in\":[[0.0,0.1]],\"light\":[[0.0]]}\n")
            .unwrap();
        assert!(String::from_utf8(echo).unwrap().starts_with("Error: Invalid profile"));

        scheduler.tick();
        let lines = &scheduler.transport().link().lines;
        assert_eq!(lines[0]["value"], "0.7");
    }

    #[test]
    fn serial_failure_on_one_channel_does_not_stop_the_others() {
        let clock = ManualClock::new();
        let link = RecordingLink {
            broken_channel: Some("aerator"),
            ..RecordingLink::default()
        };
        let transport = TransportAdapter::new(link, Duration::ZERO, 100);
        let mut scheduler =
            Scheduler::new(&LoopConfig::default(), MemoryStore::new(), transport, clock.clone());
        scheduler
            .process_command(
                r#"POINTS_PROFILE:{"light":[[0.0,1.0]],"aerator":[[0.0,1.0]],"fan_out":[[0.0,0.5]]}"#,
            )
            .unwrap();
        scheduler.process_command("START").unwrap();

        assert!(scheduler.tick());
        assert_eq!(scheduler.transport().link().channels(), vec!["light", "fan_out"]);
    }

    #[test]
    fn wireless_receive_failure_still_pumps_http() {
        let clock = ManualClock::new();
        let mut scheduler = scheduler(&clock);
        let replies = Arc::new(Mutex::new(Vec::new()));
        let mut inbox = QueueInbox::default();
        let sink = Arc::clone(&replies);
        inbox.queue.push_back(HttpCommand::new(b"START".to_vec(), move |reply| {
            sink.lock().unwrap().push(reply);
        }));

        scheduler.run_iteration(Some(&mut DeadWireless), Some(&mut inbox));

        assert_eq!(*replies.lock().unwrap(), vec![HttpReply::Ok]);
        assert!(scheduler.state().running);
    }
}
