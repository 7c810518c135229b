//! Power-of-two-choices picker over EWMA latency and success scores.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tonic::Code;
use tracing::{debug, info, trace};

use gridguard_core::{BalancerConfig, SharedClock, system_clock};

use crate::error::PickError;
use crate::picker::{Completion, Done, PickInfo, Picked, Picker, PickerBuilder, ReadyConn};

/// Registration name of the P2C policy.
pub const P2C_EWMA: &str = "p2c_ewma";

/// Success score of a fresh connection, and of every good call.
const INIT_SUCCESS: f64 = 1000.0;
/// Connections scoring at or below this are unhealthy.
const THROTTLE_SUCCESS: f64 = INIT_SUCCESS / 2.0;
/// Load assigned when the score is not a usable number.
const PENALTY: f64 = i32::MAX as f64;

/// Whether a call ending in `code` counts against the connection.
///
/// Only codes that point at the server or the network do; application
/// errors such as `NotFound` are the connection doing its job.
pub fn is_failure(code: Code) -> bool {
    matches!(
        code,
        Code::DeadlineExceeded | Code::Internal | Code::Unavailable | Code::DataLoss
    )
}

/// Point-in-time view of one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnStats {
    pub addr: String,
    pub load: f64,
    pub in_flight: i64,
    pub lag_ms: f64,
    pub success: f64,
    pub requests: i64,
}

struct ConnState {
    addr: String,
    /// f64 bits of the latency EWMA, in milliseconds.
    lag: AtomicU64,
    in_flight: AtomicI64,
    /// f64 bits of the success EWMA.
    success: AtomicU64,
    /// Picks since the last stats log.
    requests: AtomicI64,
    /// Set once the first call has completed.
    sampled: AtomicBool,
    /// Clock nanos.
    last_update: AtomicI64,
    last_pick: AtomicI64,
}

impl ConnState {
    fn new(addr: String, now: i64) -> Self {
        Self {
            addr,
            lag: AtomicU64::new(0f64.to_bits()),
            in_flight: AtomicI64::new(0),
            success: AtomicU64::new(INIT_SUCCESS.to_bits()),
            requests: AtomicI64::new(0),
            sampled: AtomicBool::new(false),
            last_update: AtomicI64::new(now),
            last_pick: AtomicI64::new(now),
        }
    }

    fn lag(&self) -> f64 {
        f64::from_bits(self.lag.load(Ordering::Acquire))
    }

    fn success(&self) -> f64 {
        f64::from_bits(self.success.load(Ordering::Acquire))
    }

    fn load(&self) -> f64 {
        let in_flight = self.in_flight.load(Ordering::Acquire) as f64;
        let load = (self.lag() + 1.0).sqrt() * (in_flight + 1.0);
        if load.is_finite() && load > 0.0 {
            load
        } else {
            PENALTY
        }
    }

    fn healthy(&self) -> bool {
        self.success() > THROTTLE_SUCCESS
    }

    fn stats(&self) -> ConnStats {
        ConnStats {
            addr: self.addr.clone(),
            load: self.load(),
            in_flight: self.in_flight.load(Ordering::Acquire),
            lag_ms: self.lag(),
            success: self.success(),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// State shared between a picker and its outstanding done handles.
struct Shared {
    conns: Vec<ConnState>,
    decay_nanos: f64,
    log_interval_nanos: i64,
    /// Clock nanos of the last stats log.
    stamp: AtomicI64,
    clock: SharedClock,
}

impl Shared {
    fn complete(&self, idx: usize, start: i64, status: Option<&tonic::Status>) {
        let conn = &self.conns[idx];
        conn.in_flight.fetch_sub(1, Ordering::AcqRel);

        let now = self.clock.now_nanos();
        let last = conn.last_update.swap(now, Ordering::AcqRel);
        let elapsed = (now - last).max(0) as f64;
        let latency_ms = (now - start).max(0) as f64 / 1e6;

        let old_lag = conn.lag();
        // The first sample replaces the initial scores outright.
        let beta = if !conn.sampled.swap(true, Ordering::AcqRel) {
            0.0
        } else {
            (-elapsed / self.decay_nanos).exp()
        };
        let lag = old_lag * beta + latency_ms * (1.0 - beta);
        conn.lag.store(lag.to_bits(), Ordering::Release);

        let score = match status {
            Some(s) if is_failure(s.code()) => 0.0,
            _ => INIT_SUCCESS,
        };
        let success = conn.success() * beta + score * (1.0 - beta);
        conn.success.store(success.to_bits(), Ordering::Release);

        let stamp = self.stamp.load(Ordering::Acquire);
        if now - stamp >= self.log_interval_nanos
            && self
                .stamp
                .compare_exchange(stamp, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.log_stats();
        }
    }

    fn log_stats(&self) {
        for conn in &self.conns {
            let requests = conn.requests.swap(0, Ordering::Relaxed);
            info!(
                addr = %conn.addr,
                load = conn.load(),
                in_flight = conn.in_flight.load(Ordering::Relaxed),
                success = conn.success(),
                requests,
                "p2c connection stats"
            );
        }
    }
}

struct CallDone {
    shared: Arc<Shared>,
    idx: usize,
    start: i64,
}

impl Completion for CallDone {
    fn complete(self: Box<Self>, status: Option<&tonic::Status>) {
        self.shared.complete(self.idx, self.start, status);
    }

    fn release(self: Box<Self>) {
        self.shared.conns[self.idx]
            .in_flight
            .fetch_sub(1, Ordering::AcqRel);
    }
}

/// Picks the less loaded of two randomly drawn connections.
pub struct P2cPicker<C> {
    conns: Vec<C>,
    shared: Arc<Shared>,
    force_pick_nanos: i64,
    pick_attempts: usize,
    rng: Mutex<StdRng>,
}

impl<C> P2cPicker<C> {
    pub fn new(ready: Vec<ReadyConn<C>>, config: &BalancerConfig) -> Self {
        Self::with_clock(ready, config, system_clock())
    }

    pub fn with_clock(ready: Vec<ReadyConn<C>>, config: &BalancerConfig, clock: SharedClock) -> Self {
        Self::with_rng(ready, config, clock, StdRng::from_entropy())
    }

    /// A picker whose random draws are reproducible.
    pub fn with_seed(
        ready: Vec<ReadyConn<C>>,
        config: &BalancerConfig,
        clock: SharedClock,
        seed: u64,
    ) -> Self {
        Self::with_rng(ready, config, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        ready: Vec<ReadyConn<C>>,
        config: &BalancerConfig,
        clock: SharedClock,
        rng: StdRng,
    ) -> Self {
        let now = clock.now_nanos();
        let (states, conns): (Vec<_>, Vec<_>) = ready
            .into_iter()
            .map(|r| (ConnState::new(r.addr, now), r.conn))
            .unzip();
        debug!(conns = conns.len(), "p2c picker built");

        Self {
            conns,
            shared: Arc::new(Shared {
                conns: states,
                decay_nanos: config.decay_time.as_nanos().max(1) as f64,
                log_interval_nanos: config.log_interval.as_nanos() as i64,
                stamp: AtomicI64::new(now),
                clock,
            }),
            force_pick_nanos: config.force_pick.as_nanos() as i64,
            pick_attempts: config.pick_attempts,
            rng: Mutex::new(rng),
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Snapshot of every connection, in ready-set order.
    pub fn stats(&self) -> Vec<ConnStats> {
        self.shared.conns.iter().map(ConnState::stats).collect()
    }

    /// Draw two distinct indices, preferring a pair where both are healthy.
    fn draw_pair(&self, rng: &mut StdRng) -> (usize, usize) {
        let n = self.conns.len();
        let mut pair = (0, 1);
        for _ in 0..self.pick_attempts {
            let a = rng.gen_range(0..n);
            let mut b = rng.gen_range(0..n - 1);
            if b >= a {
                b += 1;
            }
            pair = (a, b);
            if self.shared.conns[a].healthy() && self.shared.conns[b].healthy() {
                break;
            }
        }
        pair
    }

    fn choose(&self, a: usize, b: Option<usize>, now: i64) -> usize {
        let conns = &self.shared.conns;
        let Some(b) = b else {
            conns[a].last_pick.store(now, Ordering::Release);
            return a;
        };

        let (low, high) = if conns[a].load() > conns[b].load() {
            (b, a)
        } else {
            (a, b)
        };

        let picked = conns[high].last_pick.load(Ordering::Acquire);
        if now - picked > self.force_pick_nanos
            && conns[high]
                .last_pick
                .compare_exchange(picked, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            trace!(addr = %conns[high].addr, "forced pick of idle connection");
            return high;
        }

        conns[low].last_pick.store(now, Ordering::Release);
        low
    }
}

impl<C: Clone + Send + Sync> Picker<C> for P2cPicker<C> {
    fn pick(&self, info: &PickInfo) -> Result<Picked<C>, PickError> {
        if self.conns.is_empty() {
            trace!(method = %info.method, "no connection to pick");
            return Err(PickError::NoConnAvailable);
        }

        let mut rng = self.rng.lock().expect("picker rng lock");
        let now = self.shared.clock.now_nanos();
        let idx = match self.conns.len() {
            1 => self.choose(0, None, now),
            2 => self.choose(0, Some(1), now),
            _ => {
                let (a, b) = self.draw_pair(&mut rng);
                self.choose(a, Some(b), now)
            }
        };

        let state = &self.shared.conns[idx];
        state.in_flight.fetch_add(1, Ordering::AcqRel);
        state.requests.fetch_add(1, Ordering::Relaxed);
        drop(rng);

        trace!(method = %info.method, addr = %state.addr, "picked connection");
        Ok(Picked {
            conn: self.conns[idx].clone(),
            addr: state.addr.clone(),
            done: Done::new(CallDone {
                shared: self.shared.clone(),
                idx,
                start: now,
            }),
        })
    }
}

impl<C> fmt::Debug for P2cPicker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("P2cPicker")
            .field("conns", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Builds a [`P2cPicker`] for every new ready set.
#[derive(Debug, Clone)]
pub struct P2cBuilder {
    config: BalancerConfig,
    clock: SharedClock,
    seed: Option<u64>,
}

impl P2cBuilder {
    pub fn new(config: BalancerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: BalancerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            seed: None,
        }
    }

    /// Seed every picker this builder produces.
    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl<C: Clone + Send + Sync + 'static> PickerBuilder<C> for P2cBuilder {
    fn name(&self) -> &'static str {
        P2C_EWMA
    }

    fn build(&self, ready: Vec<ReadyConn<C>>) -> Box<dyn Picker<C>> {
        let clock = self.clock.clone();
        let picker = match self.seed {
            Some(seed) => P2cPicker::with_seed(ready, &self.config, clock, seed),
            None => P2cPicker::with_clock(ready, &self.config, clock),
        };
        Box::new(picker)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gridguard_core::ManualClock;

    use super::*;

    fn picker(n: usize, clock: &Arc<ManualClock>) -> P2cPicker<usize> {
        let ready = (0..n)
            .map(|i| ReadyConn::new(format!("10.0.0.{i}:8080"), i))
            .collect();
        P2cPicker::with_seed(ready, &BalancerConfig::default(), clock.clone(), 7)
    }

    fn clock() -> Arc<ManualClock> {
        ManualClock::shared(Duration::from_secs(100))
    }

    fn pick(p: &P2cPicker<usize>) -> Picked<usize> {
        p.pick(&PickInfo::new("/test.Echo/Say")).unwrap()
    }

    #[test]
    fn empty_set_has_nothing_to_pick() {
        let p = picker(0, &clock());
        assert_eq!(
            p.pick(&PickInfo::default()).unwrap_err(),
            PickError::NoConnAvailable
        );
    }

    #[test]
    fn single_conn_is_always_picked() {
        let clock = clock();
        let p = picker(1, &clock);
        for _ in 0..10 {
            let picked = pick(&p);
            assert_eq!(picked.conn, 0);
            assert_eq!(picked.addr, "10.0.0.0:8080");
            picked.done.finish(None);
        }
        assert_eq!(p.stats()[0].requests, 10);
        assert_eq!(p.stats()[0].in_flight, 0);
    }

    #[test]
    fn load_counts_in_flight_calls() {
        let clock = clock();
        let p = picker(1, &clock);
        let held = pick(&p);

        let stats = &p.stats()[0];
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.load, 2.0);
        held.done.finish(None);
    }

    #[test]
    fn degenerate_load_is_penalized() {
        let clock = clock();
        let p = picker(1, &clock);
        p.shared.conns[0].lag.store(f64::NAN.to_bits(), Ordering::SeqCst);
        assert_eq!(p.shared.conns[0].load(), PENALTY);
        p.shared.conns[0]
            .lag
            .store(f64::INFINITY.to_bits(), Ordering::SeqCst);
        assert_eq!(p.shared.conns[0].load(), PENALTY);
    }

    #[test]
    fn instant_calls_keep_their_history() {
        let clock = clock();
        let p = picker(1, &clock);
        for _ in 0..5 {
            pick(&p).done.finish(None);
        }
        // Zero latency, zero elapsed: a failure barely moves the score.
        pick(&p)
            .done
            .finish(Some(&tonic::Status::unavailable("reset")));

        let stats = &p.stats()[0];
        assert_eq!(stats.lag_ms, 0.0);
        assert_eq!(stats.success, INIT_SUCCESS);
        assert!(p.shared.conns[0].healthy());
    }

    #[test]
    fn conn_stats_serialize() {
        let clock = clock();
        let p = picker(1, &clock);
        let held = pick(&p);

        let json = serde_json::to_value(&p.stats()[0]).unwrap();
        assert_eq!(json["addr"], "10.0.0.0:8080");
        assert_eq!(json["in_flight"], 1);
        assert_eq!(json["success"], 1000.0);
        assert_eq!(json["requests"], 1);
        held.done.finish(None);
    }

    #[test]
    fn two_conns_prefer_lower_load() {
        let clock = clock();
        let p = picker(2, &clock);
        let held = pick(&p);
        assert_eq!(held.conn, 0);

        // Conn 0 now has a call in flight.
        let next = pick(&p);
        assert_eq!(next.conn, 1);
        next.done.finish(None);
        held.done.finish(None);
    }

    #[test]
    fn idle_conn_is_force_picked() {
        let clock = clock();
        let p = picker(2, &clock);
        p.shared.conns[1]
            .lag
            .store(10_000.0f64.to_bits(), Ordering::SeqCst);

        for _ in 0..5 {
            clock.advance(Duration::from_millis(100));
            let picked = pick(&p);
            assert_eq!(picked.conn, 0);
            picked.done.finish(None);
        }

        // Conn 1 has gone unpicked for over a second.
        clock.advance(Duration::from_millis(501));
        let forced = pick(&p);
        assert_eq!(forced.conn, 1);
        forced.done.finish(None);

        let next = pick(&p);
        assert_eq!(next.conn, 0);
        next.done.finish(None);
    }

    #[test]
    fn ewma_decays_with_time() {
        let clock = clock();
        let p = picker(1, &clock);

        let first = pick(&p);
        clock.advance(Duration::from_millis(10));
        first.done.finish(None);
        assert_eq!(p.stats()[0].lag_ms, 10.0);
        assert_eq!(p.stats()[0].success, 1000.0);

        // 20ms after the last update barely moves the average.
        let second = pick(&p);
        clock.advance(Duration::from_millis(20));
        second.done.finish(None);
        let lag = p.stats()[0].lag_ms;
        assert!((lag - 10.02).abs() < 0.001, "lag {lag}");

        // A full decay period later the new sample dominates.
        clock.advance(Duration::from_secs(10));
        let third = pick(&p);
        clock.advance(Duration::from_millis(30));
        third.done.finish(None);
        let lag = p.stats()[0].lag_ms;
        assert!(lag > 22.6 && lag < 22.75, "lag {lag}");
    }

    #[test]
    fn server_failures_make_conn_unhealthy() {
        let clock = clock();
        let p = picker(1, &clock);

        let picked = pick(&p);
        clock.advance(Duration::from_millis(5));
        picked
            .done
            .finish(Some(&tonic::Status::unavailable("connection refused")));
        assert_eq!(p.stats()[0].success, 0.0);
        assert!(!p.shared.conns[0].healthy());

        // An application error counts as success, but recovery is gradual.
        let picked = pick(&p);
        clock.advance(Duration::from_millis(5));
        picked.done.finish(Some(&tonic::Status::not_found("no such order")));
        let success = p.stats()[0].success;
        assert!(success > 0.0 && success < THROTTLE_SUCCESS, "success {success}");
    }

    #[test]
    fn failure_codes() {
        for code in [
            Code::DeadlineExceeded,
            Code::Internal,
            Code::Unavailable,
            Code::DataLoss,
        ] {
            assert!(is_failure(code), "{code:?}");
        }
        for code in [
            Code::Ok,
            Code::NotFound,
            Code::InvalidArgument,
            Code::PermissionDenied,
            Code::ResourceExhausted,
            Code::Cancelled,
        ] {
            assert!(!is_failure(code), "{code:?}");
        }
    }

    #[test]
    fn dropped_done_only_releases() {
        let clock = clock();
        let p = picker(1, &clock);
        let picked = pick(&p);
        clock.advance(Duration::from_millis(50));
        drop(picked);

        let stats = &p.stats()[0];
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.lag_ms, 0.0);
        assert_eq!(stats.requests, 1);
    }

    #[test]
    fn stats_log_resets_request_counts() {
        let clock = clock();
        let p = picker(1, &clock);
        for _ in 0..3 {
            pick(&p).done.finish(None);
        }
        assert_eq!(p.stats()[0].requests, 3);

        clock.advance(Duration::from_secs(61));
        pick(&p).done.finish(None);
        assert_eq!(p.stats()[0].requests, 0);
    }

    #[test]
    fn unhealthy_conn_is_avoided() {
        let clock = clock();
        let p = picker(4, &clock);
        p.shared.conns[0].success.store(0f64.to_bits(), Ordering::SeqCst);

        let mut hits = 0;
        for _ in 0..200 {
            let picked = pick(&p);
            if picked.conn == 0 {
                hits += 1;
            }
            drop(picked);
        }
        // A uniform pick would land on conn 0 about 50 times.
        assert!(hits < 40, "unhealthy conn picked {hits} times");
    }

    #[test]
    fn picks_are_spread_evenly() {
        const CONNS: usize = 20;
        let clock = clock();
        let p = picker(CONNS, &clock);

        let mut counts = [0usize; CONNS];
        for _ in 0..1000 {
            let picked = pick(&p);
            counts[picked.conn] += 1;
            clock.advance(Duration::from_millis(1));
            picked.done.finish(None);
        }

        let entropy: f64 = counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / 1000.0;
                -p * p.ln()
            })
            .sum();
        let normalized = entropy / (CONNS as f64).ln();
        assert!(normalized > 0.9, "normalized entropy {normalized}");
    }

    #[test]
    fn builder_is_registered_as_p2c_ewma() {
        let clock = clock();
        let builder = P2cBuilder::with_clock(BalancerConfig::default(), clock).seeded(1);
        assert_eq!(PickerBuilder::<usize>::name(&builder), "p2c_ewma");

        let picker = builder.build(vec![ReadyConn::new("a:1", 1usize), ReadyConn::new("b:1", 2)]);
        let picked = picker.pick(&PickInfo::default()).unwrap();
        assert!(picked.conn == 1 || picked.conn == 2);
        picked.done.finish(None);
    }
}
