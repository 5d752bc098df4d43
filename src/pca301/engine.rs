//! The PCA301 protocol engine: a single-outstanding-request state machine
//! over the wire frame, with retries, timeouts, and auto-poll
//! reconciliation of outlet-initiated switch events.

use super::frame::{self, Frame};
use crate::clock::Clock;
use crate::error::RadioOutcome;

/// Pseudo-event codes surfaced through the command register's announce
/// channel, alongside the ordinary `on`/`off`/`pair` state updates.
pub mod announce_cmd {
    pub const NONE: u8 = 0;
    pub const POLL: u8 = 1;
    pub const ON: u8 = 2;
    pub const OFF: u8 = 3;
    pub const IDENT: u8 = 4;
    pub const TIMEOUT_RX: u8 = 5;
    pub const PAIR: u8 = 6;
    pub const SEND_BUDGET: u8 = 7;
    pub const TIMEOUT_TX: u8 = 8;
    pub const STATS_RESET: u8 = 9;
}

/// Sends an already-encoded 12-byte frame over the radio.
pub trait PcaRadio {
    type Error;

    fn send(&mut self, frame: &[u8; frame::LEN]) -> Result<RadioOutcome, Self::Error>;
}

/// Receives register-change notifications. Implementations must preserve
/// call order: a single received frame announces `addr`, then `chan`, then
/// `rssi`, then `cmd` (and, for polls, `cons`/`cons_tot`), so observers see
/// address before state.
pub trait Announce {
    fn addr(&mut self, addr: u32);
    fn chan(&mut self, chan: u8);
    fn rssi(&mut self, rssi: i8);
    fn cmd(&mut self, cmd: u8);
    fn cons(&mut self, cons: u16);
    fn cons_tot(&mut self, cons_tot: u16);
}

/// Tunable engine configuration, mapped 1:1 onto the "PCA301 common"
/// register range.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub pair_ena: bool,
    pub chan_dfl: u8,
    pub tout_res_ms: u16,
    pub retries: u8,
    pub poll_auto: bool,
    pub frame_dump: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pair_ena: false,
            chan_dfl: 1,
            tout_res_ms: 500,
            retries: 2,
            poll_auto: true,
            frame_dump: false,
        }
    }
}

/// RX/TX counters mapped onto the "PCA301 common" statistics fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub rx_ok: u16,
    pub rx_bad_crc: u16,
    pub rx_timeout: u16,
    pub tx_ok: u16,
    pub tx_err: u16,
    pub tx_timeout: u16,
}

#[derive(Clone, Copy, Debug)]
struct PendingRequest {
    addr: [u8; frame::ADDR_LEN],
    chan: u8,
    cmd: u8,
    data: u8,
    deadline_ms: u64,
    retries_remaining: u8,
}

#[derive(Clone, Copy, Debug, Default)]
struct AutoPoll {
    addr: [u8; frame::ADDR_LEN],
    chan: u8,
    pending: bool,
}

/// Result of a RegReg access attempt against the command register while a
/// request is already outstanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Sent,
    Busy,
    /// The written value did not match any known command code.
    Unknown,
}

/// The protocol engine. Generic over the radio send path, the clock, and
/// the register announcement sink.
pub struct Engine {
    pending: Option<PendingRequest>,
    auto_poll: AutoPoll,
    pub config: Config,
    pub stats: Stats,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            pending: None,
            auto_poll: AutoPoll::default(),
            config: Config::default(),
            stats: Stats::default(),
        }
    }

    /// `true` if a request is currently outstanding (a deadline is armed).
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Transmit one frame and update the TX counters. Never touches
    /// `self.pending` — callers decide what a failed send means for any
    /// outstanding request.
    fn send<R: PcaRadio>(
        &mut self,
        radio: &mut R,
        req: &PendingRequest,
    ) -> Result<RadioOutcome, R::Error> {
        let frame = Frame {
            channel: req.chan,
            command: req.cmd,
            addr: req.addr,
            data: req.data,
            cons: frame::ID_STATION,
            cons_tot: frame::ID_STATION,
        };
        let encoded = frame.encode();

        let outcome = radio.send(&encoded)?;
        match outcome {
            RadioOutcome::Ok => self.stats.tx_ok += 1,
            RadioOutcome::NoBudget => self.stats.tx_err += 1,
            RadioOutcome::Timeout => {
                self.stats.tx_err += 1;
                self.stats.tx_timeout += 1;
            }
        }
        Ok(outcome)
    }

    fn start<R: PcaRadio, A: Announce>(
        &mut self,
        radio: &mut R,
        announce: &mut A,
        clock: &impl Clock,
        addr: [u8; frame::ADDR_LEN],
        chan: u8,
        cmd: u8,
        data: u8,
        with_deadline: bool,
    ) -> Result<CommandOutcome, R::Error> {
        if self.is_busy() {
            return Ok(CommandOutcome::Busy);
        }

        let req = PendingRequest {
            addr,
            chan,
            cmd,
            data,
            deadline_ms: if with_deadline {
                clock.now_ms() + self.config.tout_res_ms as u64
            } else {
                0
            },
            retries_remaining: self.config.retries,
        };
        if with_deadline {
            self.pending = Some(req);
        }
        let outcome = self.send(radio, &req)?;
        if !with_deadline {
            return Ok(CommandOutcome::Sent);
        }
        match outcome {
            RadioOutcome::Ok => Ok(CommandOutcome::Sent),
            RadioOutcome::NoBudget => {
                self.pending = None;
                announce.cmd(announce_cmd::SEND_BUDGET);
                Ok(CommandOutcome::Sent)
            }
            RadioOutcome::Timeout => {
                self.pending = None;
                announce.cmd(announce_cmd::TIMEOUT_TX);
                Ok(CommandOutcome::Sent)
            }
        }
    }

    /// Switch an outlet on or off.
    pub fn switch<R: PcaRadio, A: Announce>(
        &mut self,
        radio: &mut R,
        announce: &mut A,
        clock: &impl Clock,
        addr: [u8; frame::ADDR_LEN],
        chan: u8,
        on: bool,
    ) -> Result<CommandOutcome, R::Error> {
        let data = if on { frame::SWITCH_ON } else { frame::SWITCH_OFF };
        self.start(radio, announce, clock, addr, chan, frame::CMD_SWITCH, data, true)
    }

    /// Query an outlet's state and consumption counters.
    pub fn poll<R: PcaRadio, A: Announce>(
        &mut self,
        radio: &mut R,
        announce: &mut A,
        clock: &impl Clock,
        addr: [u8; frame::ADDR_LEN],
        chan: u8,
    ) -> Result<CommandOutcome, R::Error> {
        self.start(radio, announce, clock, addr, chan, frame::CMD_POLL, 0, true)
    }

    /// Fire-and-forget identify (blink) request.
    pub fn ident<R: PcaRadio, A: Announce>(
        &mut self,
        radio: &mut R,
        announce: &mut A,
        clock: &impl Clock,
        addr: [u8; frame::ADDR_LEN],
        chan: u8,
    ) -> Result<CommandOutcome, R::Error> {
        self.start(radio, announce, clock, addr, chan, frame::CMD_IDENT, 0, false)
    }

    /// Ask the outlet to reset its own statistics (a POLL frame with a
    /// dedicated data byte, not a local counter reset).
    pub fn stats_reset<R: PcaRadio, A: Announce>(
        &mut self,
        radio: &mut R,
        announce: &mut A,
        clock: &impl Clock,
        addr: [u8; frame::ADDR_LEN],
        chan: u8,
    ) -> Result<CommandOutcome, R::Error> {
        self.start(
            radio,
            announce,
            clock,
            addr,
            chan,
            frame::CMD_POLL,
            frame::POLL_STATS_RESET,
            true,
        )
    }

    /// Deliver a raw 12-byte received frame plus its RSSI reading.
    pub fn receive<R: PcaRadio, A: Announce>(
        &mut self,
        radio: &mut R,
        announce: &mut A,
        clock: &impl Clock,
        raw: &[u8; frame::LEN],
        rssi: i8,
    ) -> Result<(), R::Error> {
        let Some(mut received) = Frame::decode(raw) else {
            self.stats.rx_bad_crc += 1;
            return Ok(());
        };

        self.stats.rx_ok += 1;

        announce.addr(received.addr_u32());
        announce.chan(received.channel);
        announce.rssi(rssi);

        match received.command {
            frame::CMD_PAIR => {
                if received.channel == frame::CHAN_NONE {
                    if !self.config.pair_ena {
                        return Ok(());
                    }
                    received.channel = self.config.chan_dfl;
                    let pair_req = PendingRequest {
                        addr: received.addr,
                        chan: received.channel,
                        cmd: frame::CMD_PAIR,
                        data: 0,
                        deadline_ms: 0,
                        retries_remaining: 0,
                    };
                    let _ = self.send(radio, &pair_req)?;
                }
                announce.cmd(announce_cmd::PAIR);
            }

            frame::CMD_POLL => {
                let Some(pending) = self.pending else { return Ok(()) };
                if clock.now_ms() >= pending.deadline_ms {
                    return Ok(());
                }
                if received.is_station_echo() {
                    return Ok(());
                }
                self.pending = None;

                announce.cmd(if received.data != 0 {
                    announce_cmd::ON
                } else {
                    announce_cmd::OFF
                });
                announce.cons(received.cons);
                announce.cons_tot(received.cons_tot);
            }

            frame::CMD_SWITCH => {
                let matches_pending = self.pending.is_some_and(|p| {
                    clock.now_ms() < p.deadline_ms
                        && p.addr == received.addr
                        && p.chan == received.channel
                        && p.cmd == received.command
                        && p.data == received.data
                });

                if !matches_pending {
                    if self.config.poll_auto {
                        self.auto_poll = AutoPoll {
                            addr: received.addr,
                            chan: received.channel,
                            pending: true,
                        };
                    }
                    return Ok(());
                }

                self.pending = None;
                announce.cmd(if received.data != 0 {
                    announce_cmd::ON
                } else {
                    announce_cmd::OFF
                });
            }

            _ => {}
        }

        Ok(())
    }

    /// Write to the command-trigger register: `1`=poll, `2`=switch-on,
    /// `3`=switch-off, `4`=ident, `9`=stats-reset. `5`..`8` are read-only
    /// announce codes (`TIMEOUT_RX`, `PAIR`, `SEND_BUDGET`, `TIMEOUT_TX`),
    /// not write triggers; any value outside the five trigger codes is
    /// reported [`CommandOutcome::Unknown`] and has no effect.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch_command<R: PcaRadio, A: Announce>(
        &mut self,
        radio: &mut R,
        announce: &mut A,
        clock: &impl Clock,
        addr: [u8; frame::ADDR_LEN],
        chan: u8,
        code: u8,
    ) -> Result<CommandOutcome, R::Error> {
        match code {
            announce_cmd::POLL => self.poll(radio, announce, clock, addr, chan),
            announce_cmd::ON => self.switch(radio, announce, clock, addr, chan, true),
            announce_cmd::OFF => self.switch(radio, announce, clock, addr, chan, false),
            announce_cmd::IDENT => self.ident(radio, announce, clock, addr, chan),
            announce_cmd::STATS_RESET => self.stats_reset(radio, announce, clock, addr, chan),
            _ => Ok(CommandOutcome::Unknown),
        }
    }

    /// Advance retries/timeouts and fire a pending auto-poll. Call once
    /// per main-loop pass.
    pub fn tick<R: PcaRadio, A: Announce>(
        &mut self,
        radio: &mut R,
        announce: &mut A,
        clock: &impl Clock,
    ) -> Result<(), R::Error> {
        if let Some(mut req) = self.pending {
            if clock.now_ms() >= req.deadline_ms {
                if req.retries_remaining > 0 {
                    req.retries_remaining -= 1;
                    req.deadline_ms = clock.now_ms() + self.config.tout_res_ms as u64;
                    self.pending = Some(req);
                    match self.send(radio, &req)? {
                        RadioOutcome::Ok => {}
                        RadioOutcome::NoBudget => {
                            self.pending = None;
                            announce.cmd(announce_cmd::SEND_BUDGET);
                        }
                        RadioOutcome::Timeout => {
                            self.pending = None;
                            announce.cmd(announce_cmd::TIMEOUT_TX);
                        }
                    }
                    return Ok(());
                }

                self.pending = None;
                self.stats.rx_timeout += 1;
                announce.addr(u32::from_be_bytes([0, req.addr[0], req.addr[1], req.addr[2]]));
                announce.cmd(announce_cmd::TIMEOUT_RX);
            }
            return Ok(());
        }

        if self.auto_poll.pending {
            let addr = self.auto_poll.addr;
            let chan = self.auto_poll.chan;
            self.auto_poll.pending = false;
            self.poll(radio, announce, clock, addr, chan)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::clock::TestClock;
    use std::vec::Vec;
    use std::vec;

    #[derive(Default)]
    struct RecordingRadio {
        sent: Vec<[u8; frame::LEN]>,
        outcome: RadioOutcome,
    }

    impl PcaRadio for RecordingRadio {
        type Error = core::convert::Infallible;
        fn send(&mut self, frame: &[u8; frame::LEN]) -> Result<RadioOutcome, Self::Error> {
            self.sent.push(*frame);
            Ok(self.outcome)
        }
    }

    #[derive(Default)]
    struct RecordingAnnounce {
        addrs: Vec<u32>,
        chans: Vec<u8>,
        rssis: Vec<i8>,
        cmds: Vec<u8>,
        cons: Vec<u16>,
        cons_tot: Vec<u16>,
    }

    impl Announce for RecordingAnnounce {
        fn addr(&mut self, addr: u32) {
            self.addrs.push(addr);
        }
        fn chan(&mut self, chan: u8) {
            self.chans.push(chan);
        }
        fn rssi(&mut self, rssi: i8) {
            self.rssis.push(rssi);
        }
        fn cmd(&mut self, cmd: u8) {
            self.cmds.push(cmd);
        }
        fn cons(&mut self, cons: u16) {
            self.cons.push(cons);
        }
        fn cons_tot(&mut self, cons_tot: u16) {
            self.cons_tot.push(cons_tot);
        }
    }

    const ADDR: [u8; 3] = [0x11, 0x22, 0x33];

    #[test]
    fn pair_new_outlet_with_pairing_enabled() {
        let mut engine = Engine::new();
        engine.config.pair_ena = true;
        engine.config.chan_dfl = 11;
        let mut radio = RecordingRadio::default();
        let mut ann = RecordingAnnounce::default();
        let clock = TestClock::new();

        let incoming = Frame {
            channel: frame::CHAN_NONE,
            command: frame::CMD_PAIR,
            addr: ADDR,
            data: 0,
            cons: 0,
            cons_tot: 0,
        }
        .encode();

        engine.receive(&mut radio, &mut ann, &clock, &incoming, -60).unwrap();

        assert_eq!(ann.cmds, vec![announce_cmd::PAIR]);
        assert_eq!(radio.sent.len(), 1);
        let sent = Frame::decode(&radio.sent[0]).unwrap();
        assert_eq!(sent.channel, 11);
        assert_eq!(sent.addr, ADDR);
    }

    #[test]
    fn poll_success_announces_on_state_and_consumption() {
        let mut engine = Engine::new();
        let mut radio = RecordingRadio::default();
        let mut ann = RecordingAnnounce::default();
        let mut clock = TestClock::new();

        engine.poll(&mut radio, &mut ann, &clock, ADDR, 11).unwrap();
        assert!(engine.is_busy());

        clock.advance(10);
        let reply = Frame {
            channel: 11,
            command: frame::CMD_POLL,
            addr: ADDR,
            data: frame::SWITCH_ON,
            cons: 0x0042,
            cons_tot: 0x0001,
        }
        .encode();
        engine.receive(&mut radio, &mut ann, &clock, &reply, -50).unwrap();

        assert!(!engine.is_busy());
        assert_eq!(ann.cmds, vec![announce_cmd::ON]);
        assert_eq!(ann.cons, vec![0x0042]);
        assert_eq!(ann.cons_tot, vec![0x0001]);
    }

    #[test]
    fn unsolicited_switch_latches_auto_poll_and_next_tick_polls() {
        let mut engine = Engine::new();
        engine.config.poll_auto = true;
        let mut radio = RecordingRadio::default();
        let mut ann = RecordingAnnounce::default();
        let clock = TestClock::new();

        let unsolicited = Frame {
            channel: 11,
            command: frame::CMD_SWITCH,
            addr: ADDR,
            data: frame::SWITCH_OFF,
            cons: 0x1234,
            cons_tot: 0x0001,
        }
        .encode();
        engine.receive(&mut radio, &mut ann, &clock, &unsolicited, -60).unwrap();
        assert!(!engine.is_busy());
        assert!(radio.sent.is_empty());

        engine.tick(&mut radio, &mut ann, &clock).unwrap();
        assert_eq!(radio.sent.len(), 1);
        let sent = Frame::decode(&radio.sent[0]).unwrap();
        assert_eq!(sent.command, frame::CMD_POLL);
        assert_eq!(sent.addr, ADDR);
    }

    #[test]
    fn duty_cycle_rejection_announces_send_budget() {
        let mut engine = Engine::new();
        let mut radio = RecordingRadio {
            outcome: RadioOutcome::NoBudget,
            ..Default::default()
        };
        let mut ann = RecordingAnnounce::default();
        let clock = TestClock::new();

        engine.switch(&mut radio, &mut ann, &clock, ADDR, 11, true).unwrap();
        assert!(!engine.is_busy());
        assert_eq!(ann.cmds, vec![announce_cmd::SEND_BUDGET]);
    }

    #[test]
    fn retry_exhaustion_announces_timeout_after_configured_retries() {
        let mut engine = Engine::new();
        engine.config.retries = 1;
        engine.config.tout_res_ms = 100;
        let mut radio = RecordingRadio::default();
        let mut ann = RecordingAnnounce::default();
        let mut clock = TestClock::new();

        engine.poll(&mut radio, &mut ann, &clock, ADDR, 11).unwrap();
        assert_eq!(radio.sent.len(), 1);

        clock.advance(100);
        engine.tick(&mut radio, &mut ann, &clock).unwrap();
        assert!(engine.is_busy());
        assert_eq!(radio.sent.len(), 2);

        clock.advance(100);
        engine.tick(&mut radio, &mut ann, &clock).unwrap();
        assert!(!engine.is_busy());
        assert_eq!(engine.stats.rx_timeout, 1);
        assert!(ann.cmds.contains(&announce_cmd::TIMEOUT_RX));
    }

    #[test]
    fn crc_rejection_counts_without_announcing() {
        let mut engine = Engine::new();
        let mut radio = RecordingRadio::default();
        let mut ann = RecordingAnnounce::default();
        let clock = TestClock::new();

        let mut bytes = Frame {
            channel: 11,
            command: frame::CMD_POLL,
            addr: ADDR,
            data: 0,
            cons: 0,
            cons_tot: 0,
        }
        .encode();
        bytes[11] ^= 0xFF;

        engine.receive(&mut radio, &mut ann, &clock, &bytes, -50).unwrap();
        assert_eq!(engine.stats.rx_bad_crc, 1);
        assert!(ann.addrs.is_empty());
    }
}
