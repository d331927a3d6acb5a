//! # Supervisor Tasks
//!
//! The three cooperating tasks of the secure timeout system:
//!
//! | Task | Priority | Period | Role |
//! |------|----------|--------|------|
//! | `EventTask` | 4 | 5000 ticks | Draws an event and publishes it on one channel |
//! | `AlertTask` | 3 | 1000 ticks | Acknowledges suspicious detections, raises the alarm |
//! | `MonitorTask` | 2 | 1000 ticks | Acknowledges user detections |
//!
//! Timers 0 and 1 sit between the simulator and the pollers: each firing
//! turns an active channel into a pending detection, which the owning
//! poller then consumes.
//!
//! ```text
//!  EventTask ──record_event──► Channel.activity
//!                                   │ timer ISR latch()
//!                                   ▼
//!  Monitor/Alert ◄──acknowledge── Channel.detection
//! ```

use crate::arch::cortex_m7::InterruptController;
use crate::channel::{ActivityState, Channel, ChannelId, ACTIVITY};
use crate::config::{
    ALERT_PERIOD_TICKS, ALERT_TASK_PRIORITY, EVENT_PERIOD_TICKS, EVENT_TASK_PRIORITY, MONITOR_PERIOD_TICKS,
    MONITOR_TASK_PRIORITY, POLL_START_DELAY_TICKS, PRNG_SEED, TASK_STACK_SIZE, TIMER_UNITS,
};
use crate::kernel;
use crate::prng::Lcg;
use crate::timer::{self, CmsdkTimers};

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Watches the user channel.
#[derive(Debug, Default)]
pub struct Monitor {
    /// Polls that found a detection.
    pub detections: u32,
}

impl Monitor {
    pub const fn new() -> Self {
        Self { detections: 0 }
    }

    /// Consume a pending user detection, if any, and report the status.
    /// Returns whether activity was seen.
    pub fn poll(&mut self, channel: &Channel) -> bool {
        if channel.acknowledge() {
            self.detections = self.detections.wrapping_add(1);
            log::info!("[USER MONITOR] Activity detected              | Status: ACTIVE");
            true
        } else {
            log::info!("[USER MONITOR] No activity                    | Status: IDLE");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

/// Response to a confirmed suspicious event.
pub trait SecurityProtocol {
    fn initiate(&mut self) {
        log::info!("[SECURITY ALERT] Initiating security protocols...");
    }
}

/// The stock protocol: announce and carry on.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnounceOnly;

impl SecurityProtocol for AnnounceOnly {}

/// Watches the suspicious channel.
#[derive(Debug, Default)]
pub struct Alert<P: SecurityProtocol> {
    protocol: P,
    /// Polls that raised the alarm.
    pub alarms: u32,
}

impl<P: SecurityProtocol> Alert<P> {
    pub const fn new(protocol: P) -> Self {
        Self { protocol, alarms: 0 }
    }

    /// Consume a pending suspicious detection, if any. On alarm the
    /// security protocol runs after the status line. Returns whether the
    /// alarm was raised.
    pub fn poll(&mut self, channel: &Channel) -> bool {
        if channel.acknowledge() {
            self.alarms = self.alarms.wrapping_add(1);
            log::info!("[SECURITY ALERT] Suspicious activity detected | Status: ALARM");
            self.protocol.initiate();
            true
        } else {
            log::info!("[SECURITY ALERT] System secure                | Status: NORMAL");
            false
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }
}

// ---------------------------------------------------------------------------
// Event simulator
// ---------------------------------------------------------------------------

/// Stand-in event source: one pseudo-random classification per cycle.
#[derive(Debug, Clone, Copy)]
pub struct EventSimulator {
    rng: Lcg,
}

impl EventSimulator {
    pub const fn new(seed: u32) -> Self {
        Self { rng: Lcg::new(seed) }
    }

    /// Run one cycle: drop last cycle's activity on both channels, draw
    /// the next value and publish it on the channel it classifies into.
    pub fn cycle(&mut self, state: &ActivityState) -> ChannelId {
        log::info!("\n[EVENT SIMULATOR] ------ New Cycle Started -------------------");

        state.user.clear_activity();
        state.suspicious.clear_activity();

        let id = self.rng.next_classification();
        let count = state.channel(id).record_event();
        match id {
            ChannelId::User => {
                log::info!("[EVENT SIMULATOR] Generated: User Activity    | Count: {}\n", count)
            }
            ChannelId::Suspicious => {
                log::info!("[EVENT SIMULATOR] Generated: Security Event   | Count: {}\n", count)
            }
        }
        id
    }
}

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

extern "C" fn monitor_task() -> ! {
    let mut monitor = Monitor::new();
    kernel::sleep(POLL_START_DELAY_TICKS);
    loop {
        monitor.poll(&ACTIVITY.user);
        kernel::sleep(MONITOR_PERIOD_TICKS);
    }
}

extern "C" fn alert_task() -> ! {
    let mut alert = Alert::new(AnnounceOnly);
    kernel::sleep(POLL_START_DELAY_TICKS);
    loop {
        alert.poll(&ACTIVITY.suspicious);
        kernel::sleep(ALERT_PERIOD_TICKS);
    }
}

extern "C" fn event_task() -> ! {
    let mut simulator = EventSimulator::new(PRNG_SEED);
    loop {
        simulator.cycle(&ACTIVITY);
        kernel::sleep(EVENT_PERIOD_TICKS);
    }
}

struct TaskSpec {
    entry: extern "C" fn() -> !,
    name: &'static str,
    priority: u8,
}

const TASKS: [TaskSpec; 3] = [
    TaskSpec { entry: monitor_task, name: "MonitorTask", priority: MONITOR_TASK_PRIORITY },
    TaskSpec { entry: alert_task, name: "AlertTask", priority: ALERT_TASK_PRIORITY },
    TaskSpec { entry: event_task, name: "EventTask", priority: EVENT_TASK_PRIORITY },
];

/// Bring the supervisor up: reset the channels, arm the hardware timers
/// and create the three tasks.
///
/// A task that cannot be created is logged and skipped; the rest of the
/// system keeps running without it. Returns the number of tasks created.
pub fn start<C: InterruptController>(verbose: bool, nvic: &mut C) -> usize {
    ACTIVITY.reset();

    timer::initialize_timers(&mut CmsdkTimers, nvic, &TIMER_UNITS, verbose);

    let mut created = 0;
    for task in TASKS.iter() {
        match kernel::create_task(task.entry, task.name, TASK_STACK_SIZE, task.priority) {
            Ok(_) => created += 1,
            Err(err) => log::error!("{} not created: {}", task.name, err),
        }
    }
    created
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelSnapshot;
    use crate::timer::{service_interrupt, TimerReg, TimerRegisters, TimerUnit};

    /// Timer registers that accept writes and read back zero.
    struct NullTimers;

    impl TimerRegisters for NullTimers {
        fn read(&self, _unit: &TimerUnit, _reg: TimerReg) -> u32 {
            0
        }

        fn write(&mut self, _unit: &TimerUnit, _reg: TimerReg, _value: u32) {}
    }

    #[derive(Default)]
    struct CountingProtocol {
        runs: u32,
    }

    impl SecurityProtocol for CountingProtocol {
        fn initiate(&mut self) {
            self.runs += 1;
        }
    }

    fn flags(s: ChannelSnapshot) -> (bool, u32) {
        (s.activity, s.count)
    }

    #[test]
    fn test_first_cycle_from_seed() {
        let state = ActivityState::new();
        let mut sim = EventSimulator::new(PRNG_SEED);

        assert_eq!(sim.cycle(&state), ChannelId::User);
        assert_eq!(flags(state.user.snapshot()), (true, 1));
        assert_eq!(flags(state.suspicious.snapshot()), (false, 0));

        assert_eq!(sim.cycle(&state), ChannelId::Suspicious);
        assert_eq!(flags(state.user.snapshot()), (false, 1));
        assert_eq!(flags(state.suspicious.snapshot()), (true, 1));
    }

    #[test]
    fn test_counts_sum_to_cycles() {
        let state = ActivityState::new();
        let mut sim = EventSimulator::new(PRNG_SEED);
        const N: u32 = 101;
        for _ in 0..N {
            sim.cycle(&state);
        }
        assert_eq!(state.user.count() + state.suspicious.count(), N);
        // Parity alternates, starting odd.
        assert_eq!(state.user.count(), 51);
        assert_eq!(state.suspicious.count(), 50);
    }

    #[test]
    fn test_monitor_poll_is_idempotent() {
        let state = ActivityState::new();
        let mut monitor = Monitor::new();
        state.user.record_event();
        state.user.latch();

        assert!(monitor.poll(&state.user));
        assert!(!state.user.is_pending());
        assert!(!monitor.poll(&state.user));
        assert!(!state.user.is_pending());
        assert_eq!(monitor.detections, 1);
    }

    #[test]
    fn test_alert_poll_is_idempotent_and_runs_protocol() {
        let state = ActivityState::new();
        let mut alert = Alert::new(CountingProtocol::default());

        assert!(!alert.poll(&state.suspicious));
        assert_eq!(alert.protocol().runs, 0);

        state.suspicious.record_event();
        state.suspicious.latch();
        assert!(alert.poll(&state.suspicious));
        assert!(!alert.poll(&state.suspicious));
        assert_eq!(alert.protocol().runs, 1);
        assert_eq!(alert.alarms, 1);
    }

    #[test]
    fn test_end_to_end_user_path() {
        let state = ActivityState::new();
        let mut timers = NullTimers;
        let mut sim = EventSimulator::new(PRNG_SEED);
        let mut monitor = Monitor::new();
        let mut alert = Alert::new(CountingProtocol::default());

        sim.cycle(&state);

        // Both timers fire; only the active user channel latches.
        assert!(service_interrupt(&mut timers, &TIMER_UNITS[0], &state));
        assert!(!service_interrupt(&mut timers, &TIMER_UNITS[1], &state));
        assert!(state.user.is_pending());

        assert!(monitor.poll(&state.user));
        assert!(!alert.poll(&state.suspicious));

        let user = state.user.snapshot();
        assert!(!user.detection);
        assert_eq!(user.count, 1);
        assert_eq!(alert.protocol().runs, 0);
    }

    #[test]
    fn test_end_to_end_security_path() {
        let state = ActivityState::new();
        let mut timers = NullTimers;
        let mut sim = EventSimulator::new(PRNG_SEED);
        let mut alert = Alert::new(CountingProtocol::default());

        sim.cycle(&state);
        sim.cycle(&state);
        assert!(service_interrupt(&mut timers, &TIMER_UNITS[1], &state));
        // The timer keeps firing before the poller runs: absorbed, counted.
        assert!(!service_interrupt(&mut timers, &TIMER_UNITS[1], &state));
        assert_eq!(state.suspicious.snapshot().coalesced, 1);

        assert!(alert.poll(&state.suspicious));
        assert_eq!(alert.protocol().runs, 1);
        assert!(!state.suspicious.is_pending());
    }

    #[test]
    fn test_new_cycle_clears_stale_activity() {
        let state = ActivityState::new();
        let mut sim = EventSimulator::new(PRNG_SEED);
        sim.cycle(&state);
        state.user.latch();
        sim.cycle(&state);

        // Activity moved to the suspicious channel, the pending user
        // detection is left for its owner.
        assert!(!state.user.is_active());
        assert!(state.user.is_pending());
        assert!(state.suspicious.is_active());
    }

    #[test]
    fn test_task_table() {
        let names: Vec<&str> = TASKS.iter().map(|t| t.name).collect();
        assert_eq!(names, ["MonitorTask", "AlertTask", "EventTask"]);
        assert!(TASKS.iter().all(|t| t.name.len() <= crate::config::MAX_TASK_NAME_LEN));
        assert!(TASKS[2].priority > TASKS[1].priority && TASKS[1].priority > TASKS[0].priority);
    }
}
