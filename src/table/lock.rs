use tracing::{debug, trace};

use std::{
    cmp,
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time,
};

use crate::{config::LockMode, session::Session, table::Table, Error, Result};

// Lock state for a single table. The state mutex guards plain reads,
// state transitions additionally serialize on the database monitor,
// which is always acquired before the state mutex.
pub(crate) struct TableLock {
    state: Mutex<LockState>,
}

struct LockState {
    exclusive: Option<Arc<Session>>,
    shared: HashMap<u64, Arc<Session>>,
    waiting: VecDeque<Arc<Session>>,
}

impl TableLock {
    pub(crate) fn new() -> TableLock {
        let state = LockState {
            exclusive: None,
            shared: HashMap::new(),
            waiting: VecDeque::new(),
        };
        TableLock {
            state: Mutex::new(state),
        }
    }

    pub(crate) fn is_locked_exclusively(&self) -> bool {
        lock_state(&self.state).exclusive.is_some()
    }

    pub(crate) fn is_locked_exclusively_by(&self, session: &Session) -> bool {
        match &lock_state(&self.state).exclusive {
            Some(holder) => holder.to_id() == session.to_id(),
            None => false,
        }
    }

    pub(crate) fn is_locked_shared_by(&self, session: &Session) -> bool {
        lock_state(&self.state).shared.contains_key(&session.to_id())
    }

    // Sessions currently blocking this table, the exclusive owner and
    // every recorded shared holder.
    fn holders(&self) -> Vec<Arc<Session>> {
        let st = lock_state(&self.state);
        let mut holders: Vec<Arc<Session>> = vec![];
        if let Some(holder) = &st.exclusive {
            holders.push(Arc::clone(holder));
        }
        for holder in st.shared.values() {
            if !holders.iter().any(|h| h.to_id() == holder.to_id()) {
                holders.push(Arc::clone(holder));
            }
        }
        holders
    }

    fn is_head(&self, session: &Session) -> bool {
        match lock_state(&self.state).waiting.front() {
            Some(head) => head.to_id() == session.to_id(),
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        let mut st = lock_state(&self.state);
        st.exclusive = None;
        st.shared.clear();
        st.waiting.clear();
    }
}

/// Acquire the table lock for `session`. Return true when the session
/// already held a sufficient lock, refer to [Table::lock].
pub(crate) fn lock(
    table: &Arc<Table>,
    session: &Arc<Session>,
    exclusive: bool,
    force: bool,
) -> Result<bool> {
    let mode = table.as_database().as_settings().lock_mode;
    let tlock = table.as_lock();

    if let LockMode::Off = mode {
        return Ok(tlock.is_locked_exclusively());
    }

    // fast path, outside the monitor
    if is_held(&lock_state(&tlock.state), session, exclusive) {
        return Ok(true);
    }

    let monitor = table.as_database().as_monitor();
    let guard = match monitor.mu.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    };

    // re-check, racing with another session's unlock
    if is_held(&lock_state(&tlock.state), session, exclusive) {
        return Ok(true);
    }

    lock_state(&tlock.state).waiting.push_back(Arc::clone(session));
    session.set_wait_for(Some(Arc::clone(table)));
    trace!(
        table = table.to_name().as_str(),
        session = session.to_id(),
        exclusive,
        "waiting for table lock"
    );

    let (guard, res) = do_lock1(table, session, exclusive, force, mode, guard);

    // dequeue self and drop the wait-for edge, still under the monitor
    {
        let mut st = lock_state(&tlock.state);
        if let Some(off) = st.waiting.iter().position(|s| s.to_id() == session.to_id()) {
            st.waiting.remove(off);
        }
    }
    session.set_wait_for(None);
    drop(guard);

    res.map(|_| false)
}

// The wait loop. Only the head of the FIFO attempts the grant, losers
// sleep on the database monitor with a capped granularity, re-running
// deadlock detection after the first failed attempt.
fn do_lock1<'a>(
    table: &Arc<Table>,
    session: &Arc<Session>,
    exclusive: bool,
    force: bool,
    mode: LockMode,
    mut guard: MutexGuard<'a, ()>,
) -> (MutexGuard<'a, ()>, Result<()>) {
    let monitor = table.as_database().as_monitor();
    let deadlock_check = table.as_database().as_settings().deadlock_check;

    let mut check_deadlock = false;
    let mut deadline: Option<time::Instant> = None;

    loop {
        if table.as_lock().is_head(session) && do_lock2(table, session, exclusive, force, mode) {
            return (guard, Ok(()));
        }

        if check_deadlock {
            if let Some(details) = find_deadlock(table, session) {
                debug!(
                    table = table.to_name().as_str(),
                    session = session.to_id(),
                    "deadlock detected"
                );
                let res = err_at!(
                    Deadlock,
                    msg: "while locking table {:?}\n{}", table.to_name(), details.join("\n")
                );
                return (guard, res);
            }
        } else {
            // check for deadlocks from now on
            check_deadlock = true;
        }

        let now = time::Instant::now();
        let until = *deadline.get_or_insert_with(|| now + session.to_lock_timeout());
        if now >= until {
            debug!(
                table = table.to_name().as_str(),
                session = session.to_id(),
                "lock timeout"
            );
            let res = err_at!(LockTimeout, msg: "on table {:?}", table.to_name());
            return (guard, res);
        }

        if let LockMode::TableGc = mode {
            probe_free_memory();
        }

        let remaining = (until - now).as_millis() as u64;
        let sleep_ms = cmp::max(1, cmp::min(deadlock_check, remaining));
        let sleep = time::Duration::from_millis(sleep_ms);
        guard = match monitor.cv.wait_timeout(guard, sleep) {
            Ok((guard, _)) => guard,
            Err(poison) => poison.into_inner().0,
        };
    }
}

// Grant rules. Exclusive iff there is no current owner and the shared
// map is empty or holds only the requester (an upgrade). Shared iff
// there is no exclusive owner, under READ_COMMITTED the grant is not
// recorded unless forced.
fn do_lock2(
    table: &Arc<Table>,
    session: &Arc<Session>,
    exclusive: bool,
    force: bool,
    mode: LockMode,
) -> bool {
    let mut st = lock_state(&table.as_lock().state);

    let owner = st.exclusive.as_ref().map(|holder| holder.to_id());
    match (owner, exclusive) {
        (Some(owner), _) if owner == session.to_id() => true,
        (Some(_), _) => false,
        (None, true) => {
            let sole = st.shared.is_empty()
                || (st.shared.len() == 1 && st.shared.contains_key(&session.to_id()));
            if sole {
                st.exclusive = Some(Arc::clone(session));
                trace!(
                    table = table.to_name().as_str(),
                    session = session.to_id(),
                    "exclusive lock granted"
                );
                true
            } else {
                false
            }
        }
        (None, false) => {
            if !(mode == LockMode::ReadCommitted && !force) {
                st.shared.insert(session.to_id(), Arc::clone(session));
            }
            trace!(
                table = table.to_name().as_str(),
                session = session.to_id(),
                "shared lock granted"
            );
            true
        }
    }
}

/// Release whatever lock `session` holds on `table` and wake up waiting
/// sessions. Never fails.
pub(crate) fn unlock(table: &Table, session: &Session) {
    let mode = table.as_database().as_settings().lock_mode;
    if let LockMode::Off = mode {
        return;
    }
    let tlock = table.as_lock();

    {
        let mut st = lock_state(&tlock.state);
        let owner = match &st.exclusive {
            Some(holder) => holder.to_id() == session.to_id(),
            None => false,
        };
        if owner {
            st.exclusive = None;
        }
    }

    // drop the shared entry and wake up waiters, under the monitor
    let monitor = table.as_database().as_monitor();
    let guard = match monitor.mu.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    };
    let waiters = {
        let mut st = lock_state(&tlock.state);
        st.shared.remove(&session.to_id());
        !st.waiting.is_empty()
    };
    if waiters {
        monitor.cv.notify_all();
    }
    drop(guard);

    trace!(
        table = table.to_name().as_str(),
        session = session.to_id(),
        "unlocked"
    );
}

// Walk the wait-for edges looking for a cycle that closes back on
// `start`. Return a detail line for every session along the cycle.
fn find_deadlock(table: &Arc<Table>, start: &Arc<Session>) -> Option<Vec<String>> {
    let mut visited: HashSet<u64> = HashSet::new();
    visited.insert(start.to_id());
    visit(table, start, start, &mut visited)
}

fn visit(
    table: &Arc<Table>,
    waiter: &Arc<Session>,
    start: &Arc<Session>,
    visited: &mut HashSet<u64>,
) -> Option<Vec<String>> {
    for holder in table.as_lock().holders() {
        if holder.to_id() == waiter.to_id() {
            continue;
        }
        if holder.to_id() == start.to_id() {
            return Some(vec![detail(waiter, table)]);
        }
        if !visited.insert(holder.to_id()) {
            continue;
        }
        if let Some(next) = holder.to_wait_for() {
            if let Some(mut details) = visit(&next, &holder, start, visited) {
                details.push(detail(waiter, table));
                return Some(details);
            }
        }
    }
    None
}

fn detail(session: &Arc<Session>, table: &Arc<Table>) -> String {
    format!(
        "session {} waiting to lock table {:?}",
        session.to_name(),
        table.to_name()
    )
}

fn is_held(st: &LockState, session: &Session, exclusive: bool) -> bool {
    match &st.exclusive {
        Some(holder) if holder.to_id() == session.to_id() => true,
        _ if !exclusive => st.shared.contains_key(&session.to_id()),
        _ => false,
    }
}

// Historical heuristic for LockMode::TableGc, probe free memory up to
// 20 times while it keeps changing. Legacy runtimes used this window to
// let their collector catch up before sleeping on the monitor.
fn probe_free_memory() {
    let mut prev = free_memory();
    for _ in 0..20 {
        std::thread::yield_now();
        let cur = free_memory();
        if cur == prev {
            break;
        }
        prev = cur;
    }
}

fn free_memory() -> u64 {
    sys_info::mem_info().map(|info| info.free).unwrap_or(0)
}

fn lock_state(state: &Mutex<LockState>) -> MutexGuard<LockState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

#[cfg(test)]
#[path = "lock_test.rs"]
mod lock_test;
