use core::{
    cmp::Ordering,
    marker::PhantomData,
};

use binary_heap_plus::{
    BinaryHeap,
    MinComparator,
};
use tracing::trace;

use crate::{
    host::Host,
    logging,
    netscript::NsWrapper,
};

pub trait Event {
    fn trigger_time(&self) -> f64;
}

pub struct EventLoopContext<E>
where
    E: Event,
{
    now: f64,
    next_events: Vec<E>,
    grace_period: f64,
}

impl<E> EventLoopContext<E>
where
    E: Event,
{
    pub fn new(
        now: f64,
        grace_period: f64,
    ) -> EventLoopContext<E> {
        EventLoopContext {
            now,
            next_events: Vec::with_capacity(16),
            grace_period,
        }
    }

    pub fn add_event(
        &mut self,
        event: E,
    ) {
        self.next_events.push(event);
    }

    pub fn get_grace_period(&self) -> f64 {
        self.grace_period
    }

    /// Time the current event is being handled at.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn pending(&self) -> &[E] {
        &self.next_events
    }

    fn drain_to_event_pool(
        &mut self,
        extensible: &mut impl Extend<EventWrapper<E>>,
    ) {
        let drain_src = self.next_events.drain(..).map(EventWrapper);
        extensible.extend(drain_src)
    }
}

pub trait EventLoopState<H>
where
    H: Host,
{
    type Event: Event;

    fn initial_run(
        &mut self,
        host: &H,
        ctx: &mut EventLoopContext<Self::Event>,
    );

    fn on_event(
        &mut self,
        host: &H,
        event: Self::Event,
        ctx: &mut EventLoopContext<Self::Event>,
    );

    /// Called instead of [`EventLoopState::on_event`] when an event is
    /// overdue by more than the grace period.
    fn on_event_fail(
        &mut self,
        host: &H,
        event: Self::Event,
        ctx: &mut EventLoopContext<Self::Event>,
    );

    fn post_loop_inspect(
        &self,
        _host: &H,
        _pending: usize,
    ) {
    }

    fn should_stop(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct EventWrapper<E>(pub E)
where
    E: Event;

impl<E> PartialOrd for EventWrapper<E>
where
    E: Event,
{
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for EventWrapper<E>
where
    E: Event,
{
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        self.0.trigger_time().total_cmp(&other.0.trigger_time())
    }
}

impl<E> PartialEq for EventWrapper<E>
where
    E: Event,
{
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E> Eq for EventWrapper<E> where E: Event {}

impl<E> From<E> for EventWrapper<E>
where
    E: Event,
{
    fn from(e: E) -> EventWrapper<E> {
        EventWrapper(e)
    }
}

/// What [`EventLoop::step`] did with the earliest event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stepped {
    Handled,
    Failed,
    NotYet,
    Empty,
}

pub struct EventLoop<H, S>
where
    H: Host,
    S: EventLoopState<H>,
{
    event_pool: BinaryHeap<EventWrapper<S::Event>, MinComparator>,
    state: S,
    grace_period: f64,
    _host: PhantomData<fn(&H)>,
}

impl<H, S> EventLoop<H, S>
where
    H: Host,
    S: EventLoopState<H>,
{
    pub fn new(state: S) -> EventLoop<H, S> {
        EventLoop {
            event_pool: BinaryHeap::new_min(),
            state,
            grace_period: 50., // milliseconds
            _host: PhantomData,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn pending(&self) -> usize {
        self.event_pool.len()
    }

    pub fn next_trigger_time(&self) -> Option<f64> {
        self.event_pool.peek().map(|e| e.0.trigger_time())
    }

    /// Populates the pool.
    pub fn start(
        &mut self,
        host: &H,
    ) {
        let mut context = EventLoopContext::new(host.now(), self.grace_period);
        self.state.initial_run(host, &mut context);
        context.drain_to_event_pool(&mut self.event_pool);
    }

    /// Handles the earliest event if its time has come by `now`.
    pub fn step(
        &mut self,
        host: &H,
        now: f64,
    ) -> Stepped {
        let due = match self.next_trigger_time() {
            None => return Stepped::Empty,
            Some(time) => time,
        };

        if now < due {
            return Stepped::NotYet;
        }

        let event = match self.event_pool.pop() {
            Some(event) => event.0,
            None => return Stepped::Empty,
        };

        let mut context = EventLoopContext::new(now, self.grace_period);

        // if the trigger time is beyond grace period, it's too late. fail.
        let stepped = if now - due <= self.grace_period {
            self.state.on_event(host, event, &mut context);
            Stepped::Handled
        }
        else {
            trace!(late_by = now - due, "event missed its window");
            self.state.on_event_fail(host, event, &mut context);
            Stepped::Failed
        };

        context.drain_to_event_pool(&mut self.event_pool);
        self.state.post_loop_inspect(host, self.event_pool.len());

        stepped
    }
}

impl<'a, S> EventLoop<NsWrapper<'a>, S>
where
    S: EventLoopState<NsWrapper<'a>>,
{
    /// Sleeps until each event is due and handles it, until the pool is
    /// empty or the state asks to stop.
    pub async fn run(
        &mut self,
        ns: &NsWrapper<'a>,
    ) {
        self.start(ns);
        logging::flush_to(ns);

        while let Some(due) = self.next_trigger_time() {
            if self.state.should_stop() {
                break;
            }

            let now = ns.now();
            if now < due {
                ns.sleep(due - now).await;
            }

            self.step(ns, ns.now().max(due));
            logging::flush_to(ns);
        }
    }
}
