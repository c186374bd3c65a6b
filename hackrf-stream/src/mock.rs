//! Scripted USB host for exercising the driver without hardware.
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{
    consts::ControlRequest,
    host::{Completion, Endpoint, TransferId, UsbError, UsbHost},
};

pub const VERSION: &str = "2024.02.1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlRecord {
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

struct State {
    board_id: u8,
    ack: u8,
    fail_claim: bool,
    failing: HashSet<u8>,
    short: HashMap<u8, usize>,
    controls: Vec<ControlRecord>,
    // None means IN transfers keep completing forever.
    in_budget: Option<usize>,
    fail_submit: bool,
    next_id: u64,
    in_seq: u8,
    submitted: usize,
    pending: VecDeque<(TransferId, Endpoint, Vec<u8>)>,
    done: VecDeque<Completion>,
    fail_in: Option<UsbError>,
    // Empty polls each cancelled transfer sits out before it completes.
    cancel_lag: usize,
    lagging: VecDeque<(Completion, usize)>,
    sent: Vec<u8>,
}

struct Inner {
    state: Mutex<State>,
    cond: Condvar,
}

/// Cloning shares the same script, so a test can keep a handle while the
/// driver owns another.
#[derive(Clone)]
pub struct MockHost {
    inner: Arc<Inner>,
}

impl MockHost {
    pub fn new(board_id: u8) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    board_id,
                    ack: 1,
                    fail_claim: false,
                    failing: HashSet::new(),
                    short: HashMap::new(),
                    controls: Vec::new(),
                    in_budget: Some(0),
                    fail_submit: false,
                    next_id: 0,
                    in_seq: 0,
                    submitted: 0,
                    pending: VecDeque::new(),
                    done: VecDeque::new(),
                    fail_in: None,
                    cancel_lag: 0,
                    lagging: VecDeque::new(),
                    sent: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    pub fn controls(&self) -> Vec<ControlRecord> {
        self.state().controls.clone()
    }

    pub fn requests(&self, req: ControlRequest) -> Vec<ControlRecord> {
        self.state()
            .controls
            .iter()
            .filter(|c| c.request == req as u8)
            .cloned()
            .collect()
    }

    pub fn clear_controls(&self) {
        self.state().controls.clear();
    }

    pub fn set_ack(&self, ack: u8) {
        self.state().ack = ack;
    }

    pub fn set_fail_claim(&self, fail: bool) {
        self.state().fail_claim = fail;
    }

    pub fn fail_request(&self, req: ControlRequest) {
        self.state().failing.insert(req as u8);
    }

    pub fn short_reply(&self, req: ControlRequest, len: usize) {
        self.state().short.insert(req as u8, len);
    }

    /// Let this many more IN transfers complete. `None` for no limit.
    pub fn set_in_budget(&self, budget: Option<usize>) {
        self.state().in_budget = budget;
        self.inner.cond.notify_all();
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.state().fail_submit = fail;
    }

    /// Complete the oldest pending IN transfer with `err`, budget or not.
    pub fn fail_next_in(&self, err: UsbError) {
        self.state().fail_in = Some(err);
        self.inner.cond.notify_all();
    }

    /// Hand `wait_any` a completion the driver never submitted.
    pub fn inject(&self, completion: Completion) {
        self.state().done.push_back(completion);
        self.inner.cond.notify_all();
    }

    /// Make each cancelled transfer wait out `polls` empty `wait_any` calls.
    pub fn set_cancel_lag(&self, polls: usize) {
        self.state().cancel_lag = polls;
    }

    /// Transfers submitted and not yet handed back through `wait_any`.
    pub fn outstanding(&self) -> usize {
        let st = self.state();
        st.pending.len() + st.done.len() + st.lagging.len()
    }

    pub fn submitted(&self) -> usize {
        self.state().submitted
    }

    /// First byte of every OUT packet that went out, in order.
    pub fn sent(&self) -> Vec<u8> {
        self.state().sent.clone()
    }

    fn check(
        &self,
        st: &mut State,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), UsbError> {
        if st.fail_claim {
            return Err(UsbError::Claim);
        }
        st.controls.push(ControlRecord {
            request,
            value,
            index,
            data: data.to_vec(),
        });
        if st.failing.contains(&request) {
            return Err(UsbError::Stall);
        }
        Ok(())
    }
}

impl UsbHost for MockHost {
    fn claim_interface(&self) -> Result<(), UsbError> {
        if self.state().fail_claim {
            Err(UsbError::Claim)
        } else {
            Ok(())
        }
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        let mut st = self.state();
        self.check(&mut st, request, value, index, &[])?;
        let reply: Vec<u8> = if request == ControlRequest::BoardIdRead as u8 {
            vec![st.board_id]
        } else if request == ControlRequest::VersionStringRead as u8 {
            let mut v = VERSION.as_bytes().to_vec();
            v.push(0);
            v
        } else if request == ControlRequest::BoardPartidSerialnoRead as u8 {
            (0..6u32)
                .flat_map(|i| (0xa000_cb3c + i).to_le_bytes())
                .collect()
        } else {
            vec![st.ack]
        };
        let len = st
            .short
            .get(&request)
            .copied()
            .unwrap_or(reply.len())
            .min(buf.len())
            .min(reply.len());
        buf[..len].copy_from_slice(&reply[..len]);
        Ok(len)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        let mut st = self.state();
        self.check(&mut st, request, value, index, data)?;
        Ok(st.short.get(&request).copied().unwrap_or(data.len()))
    }

    fn submit_bulk(&self, endpoint: Endpoint, buf: Vec<u8>) -> Result<TransferId, UsbError> {
        let mut st = self.state();
        if st.fail_submit {
            return Err(UsbError::Disconnected);
        }
        let id = TransferId(st.next_id);
        st.next_id += 1;
        st.submitted += 1;
        st.pending.push_back((id, endpoint, buf));
        self.inner.cond.notify_all();
        Ok(id)
    }

    fn wait_any(&self, timeout: Duration) -> Result<Option<Completion>, UsbError> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state();
        loop {
            if let Some(c) = st.done.pop_front() {
                return Ok(Some(c));
            }
            if let Some((_, left)) = st.lagging.front_mut() {
                if *left > 0 {
                    *left -= 1;
                    return Ok(None);
                }
                let (c, _) = st.lagging.pop_front().unwrap();
                return Ok(Some(c));
            }
            let in_open = st.in_budget != Some(0) || st.fail_in.is_some();
            let ready = st
                .pending
                .iter()
                .position(|(_, ep, _)| *ep == Endpoint::Out || in_open);
            if let Some(pos) = ready {
                let (id, endpoint, mut buf) = st.pending.remove(pos).unwrap();
                if endpoint == Endpoint::In {
                    if let Some(err) = st.fail_in.take() {
                        return Ok(Some(Completion {
                            id,
                            endpoint,
                            buf,
                            status: Err(err),
                        }));
                    }
                }
                match endpoint {
                    Endpoint::In => {
                        if let Some(b) = st.in_budget.as_mut() {
                            *b -= 1;
                        }
                        buf.fill(st.in_seq);
                        st.in_seq = st.in_seq.wrapping_add(1);
                    }
                    Endpoint::Out => {
                        let first = buf.first().copied().unwrap_or(0);
                        st.sent.push(first);
                    }
                }
                return Ok(Some(Completion {
                    id,
                    endpoint,
                    buf,
                    status: Ok(()),
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            st = self.inner.cond.wait_timeout(st, deadline - now).unwrap().0;
        }
    }

    fn cancel(&self, id: TransferId) {
        let mut st = self.state();
        if let Some(pos) = st.pending.iter().position(|(t, _, _)| *t == id) {
            let (id, endpoint, buf) = st.pending.remove(pos).unwrap();
            let completion = Completion {
                id,
                endpoint,
                buf,
                status: Err(UsbError::Cancelled),
            };
            if st.cancel_lag == 0 {
                st.done.push_back(completion);
            } else {
                let lag = st.cancel_lag;
                st.lagging.push_back((completion, lag));
            }
            self.inner.cond.notify_all();
        }
    }
}
