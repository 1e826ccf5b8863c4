//! Priority queue: five FIFO bands drained highest-priority-first, with
//! optional within-band fairness, cancellation, and deadline expiry.
//! Structured around `Priority::ALL`'s five fixed bands instead of a
//! single list.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use uuid::Uuid;

use crate::error::GatewayError;
use crate::metrics::{QUEUE_DEPTH, QUEUE_WAIT_MS};
use crate::model::{Priority, Request};

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical => "critical",
        Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
        Priority::Background => "background",
    }
}

/// A request waiting for a worker slot, plus queue bookkeeping.
pub struct QueuedRequest {
    pub id: Uuid,
    pub request: Request,
    pub user_id: Option<String>,
    pub enqueued_at: Instant,
    pub deadline: Option<Instant>,
}

struct Bands {
    bands: [VecDeque<QueuedRequest>; 5],
    in_flight_by_user: HashMap<String, u64>,
}

impl Bands {
    fn new() -> Self {
        Self { bands: Default::default(), in_flight_by_user: HashMap::new() }
    }

    fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }
}

/// Five FIFO bands guarded by a single lock (: "one lock guarding
/// the five bands and in-flight index").
pub struct PriorityQueue {
    max_queue_size: usize,
    fairness: bool,
    inner: Mutex<Bands>,
}

impl PriorityQueue {
    pub fn new(max_queue_size: usize, fairness: bool) -> Self {
        Self { max_queue_size, fairness, inner: Mutex::new(Bands::new()) }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").len()
    }

    /// Total capacity across all five bands (`maxQueueSize` per band), for
    /// computing queue utilization.
    pub fn capacity(&self) -> usize {
        self.max_queue_size * Priority::ALL.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends to the band matching `request.priority`; fails with
    /// `QueueFull` once that band reaches `maxQueueSize` ( — the
    /// limit is per-band, matching the per-band `VecDeque` storage).
    pub fn enqueue(&self, request: Request, deadline: Option<Instant>) -> Result<Uuid, GatewayError> {
        let id = Uuid::new_v4();
        let user_id = request.user_id.clone();
        let band_index = request.priority.band_index();
        let label = priority_label(request.priority);
        let mut bands = self.inner.lock().expect("queue lock poisoned");
        if bands.bands[band_index].len() >= self.max_queue_size {
            return Err(GatewayError::QueueFull);
        }
        bands.bands[band_index].push_back(QueuedRequest {
            id,
            request,
            user_id,
            enqueued_at: Instant::now(),
            deadline,
        });
        QUEUE_DEPTH.with_label_values(&[label]).inc();
        Ok(id)
    }

    /// Drains higher-priority bands before lower ones. Within a band,
    /// fairness selects the queued request whose `userId` has the fewest
    /// currently in-flight requests, ties broken by FIFO; otherwise strict
    /// FIFO.
    ///
    /// Expired entries (deadline elapsed while still queued) are dropped
    /// along the way and returned separately so the caller can record
    /// `Timeout` outcomes for them.
    pub fn dequeue(&self) -> (Option<QueuedRequest>, Vec<QueuedRequest>) {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut bands = self.inner.lock().expect("queue lock poisoned");

        for band_index in 0..Priority::ALL.len() {
            // Drop expired entries from this band first.
            let band = &mut bands.bands[band_index];
            let mut i = 0;
            while i < band.len() {
                let is_expired = band[i].deadline.is_some_and(|d| now >= d);
                if is_expired {
                    let dropped = band.remove(i).expect("index in bounds");
                    QUEUE_DEPTH.with_label_values(&[priority_label(dropped.request.priority)]).dec();
                    expired.push(dropped);
                } else {
                    i += 1;
                }
            }
            if band.is_empty() {
                continue;
            }

            let selected_index = if self.fairness {
                let in_flight = &bands.in_flight_by_user;
                let band_ref: &VecDeque<QueuedRequest> = band;
                band_ref
                    .iter()
                    .enumerate()
                    .min_by_key(|(i, q)| {
                        let user = q.user_id.as_deref();
                        let in_flight_count = user.and_then(|u| in_flight.get(u)).copied().unwrap_or(0);
                        // A user with more of their own requests still sitting in this
                        // band is less "starved" than one with fewer, so on an
                        // in-flight tie the lighter user goes first (spec.md:316).
                        let own_queued = user
                            .map(|u| band_ref.iter().filter(|other| other.user_id.as_deref() == Some(u)).count())
                            .unwrap_or(1);
                        (in_flight_count, own_queued, *i)
                    })
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            } else {
                0
            };

            let picked = bands.bands[band_index].remove(selected_index).expect("selected index in bounds");
            if let Some(user) = &picked.user_id {
                *bands.in_flight_by_user.entry(user.clone()).or_insert(0) += 1;
            }
            QUEUE_DEPTH.with_label_values(&[priority_label(picked.request.priority)]).dec();
            QUEUE_WAIT_MS.observe(now.duration_since(picked.enqueued_at).as_secs_f64() * 1000.0);
            return (Some(picked), expired);
        }
        (None, expired)
    }

    /// Marks a user's in-flight count back down after their request
    /// completes, so fairness accounting stays accurate.
    pub fn mark_complete(&self, user_id: Option<&str>) {
        let Some(user_id) = user_id else { return };
        let mut bands = self.inner.lock().expect("queue lock poisoned");
        if let Some(count) = bands.in_flight_by_user.get_mut(user_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Removes a queued (not yet dequeued) request by id in O(band-size)
    ///.
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut bands = self.inner.lock().expect("queue lock poisoned");
        for band in &mut bands.bands {
            if let Some(pos) = band.iter().position(|q| q.id == id) {
                let removed = band.remove(pos).expect("position in bounds");
                QUEUE_DEPTH.with_label_values(&[priority_label(removed.request.priority)]).dec();
                return true;
            }
        }
        false
    }
}

impl Default for Bands {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, CorrelationId, Message, Parameters, Role};
    use std::time::Duration;

    fn make_request(priority: Priority, user_id: Option<&str>) -> Request {
        Request {
            correlation_id: CorrelationId::new(),
            tenant_id: None,
            user_id: user_id.map(str::to_string),
            user_group: None,
            provider: "openai".into(),
            model: "gpt-4".into(),
            messages: vec![Message { role: Role::User, content: Content::Text("hi".into()) }],
            parameters: Parameters::default(),
            streaming: false,
            priority,
        }
    }

    #[test]
    fn drains_higher_priority_bands_first() {
        let queue = PriorityQueue::new(10, false);
        queue.enqueue(make_request(Priority::Low, None), None).unwrap();
        queue.enqueue(make_request(Priority::Critical, None), None).unwrap();
        let (picked, _) = queue.dequeue();
        assert_eq!(picked.unwrap().request.priority, Priority::Critical);
    }

    #[test]
    fn full_band_rejects_enqueue() {
        let queue = PriorityQueue::new(1, false);
        queue.enqueue(make_request(Priority::Normal, None), None).unwrap();
        assert_eq!(queue.enqueue(make_request(Priority::Normal, None), None), Err(GatewayError::QueueFull));
    }

    #[test]
    fn fairness_prefers_user_with_fewer_in_flight() {
        let queue = PriorityQueue::new(10, true);
        queue.enqueue(make_request(Priority::Normal, Some("busy")), None).unwrap();
        queue.enqueue(make_request(Priority::Normal, Some("idle")), None).unwrap();
        let (first, _) = queue.dequeue();
        assert_eq!(first.as_ref().unwrap().user_id.as_deref(), Some("busy"));
        // "busy" is now in-flight once; "idle" should win the next pick.
        let (second, _) = queue.dequeue();
        assert_eq!(second.as_ref().unwrap().user_id.as_deref(), Some("idle"));
    }

    #[test]
    fn fairness_prefers_lighter_user_on_zero_in_flight_tie() {
        // U1 enqueues 3 normal requests, U2 enqueues 1. With everyone at
        // zero in-flight, U2 (fewer of their own requests queued) goes
        // first; U1's three then drain in FIFO.
        let queue = PriorityQueue::new(10, true);
        queue.enqueue(make_request(Priority::Normal, Some("u1")), None).unwrap();
        queue.enqueue(make_request(Priority::Normal, Some("u1")), None).unwrap();
        queue.enqueue(make_request(Priority::Normal, Some("u1")), None).unwrap();
        queue.enqueue(make_request(Priority::Normal, Some("u2")), None).unwrap();

        let (first, _) = queue.dequeue();
        assert_eq!(first.as_ref().unwrap().user_id.as_deref(), Some("u2"));

        for _ in 0..3 {
            let (next, _) = queue.dequeue();
            assert_eq!(next.as_ref().unwrap().user_id.as_deref(), Some("u1"));
        }
    }

    #[test]
    fn cancel_removes_queued_request() {
        let queue = PriorityQueue::new(10, false);
        let id = queue.enqueue(make_request(Priority::Normal, None), None).unwrap();
        assert!(queue.cancel(id));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn expired_deadline_is_dropped_on_dequeue() {
        let queue = PriorityQueue::new(10, false);
        let past_deadline = Instant::now() - Duration::from_secs(1);
        queue.enqueue(make_request(Priority::Normal, None), Some(past_deadline)).unwrap();
        let (picked, expired) = queue.dequeue();
        assert!(picked.is_none());
        assert_eq!(expired.len(), 1);
    }
}
