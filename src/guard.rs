// 🔒 Register-Shift Guard
//
// The only writer of registers.status and shifts.closed_at. Each operation is
// one unit of work: the lock is taken first, the invariant is checked against
// the locked row set, and the mutation commits (or everything rolls back).
//
// Invariants:
// - at most one Open register per branch
// - at most one open shift (closed_at IS NULL) per register

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::db::Event;
use crate::entities::{Actor, Register, RegisterStatus, Shift, ShiftTotals};
use crate::error::{GuardError, GuardResult};
use crate::store::{Store, UnitOfWork};

pub const BRANCH_HAS_OPEN_REGISTER: &str = "branch already has an open register";
pub const REGISTER_HAS_OPEN_SHIFT: &str = "register already has an open shift";

/// Result of opening (or reopening) a register
#[derive(Debug, Clone, Serialize)]
pub struct OpenedRegister {
    pub register: Register,
    /// The register's open shift after the call
    pub shift: Shift,
    /// false when an open shift already existed and was kept
    pub shift_created: bool,
}

/// Result of closing a register
#[derive(Debug, Clone, Serialize)]
pub struct ClosedRegister {
    pub register: Register,
    /// Shift that was open and got closed by this call, if any
    pub closed_shift: Option<Shift>,
    pub closed_at: DateTime<Utc>,
}

pub struct RegisterShiftGuard<S: Store> {
    store: S,
    retry: RetryPolicy,
}

impl<S: Store> RegisterShiftGuard<S> {
    pub fn new(store: S) -> Self {
        RegisterShiftGuard {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================================================================
    // REGISTERS
    // ========================================================================

    /// Create a new Open register in `branch_id` and open a shift on it
    pub fn open_register(
        &self,
        actor: &Actor,
        branch_id: i64,
        location: &str,
    ) -> GuardResult<OpenedRegister> {
        let location = Some(location.trim()).filter(|l| !l.is_empty());

        self.run("open_register", || {
            let uow = self.store.begin()?;

            if uow.find_branch(branch_id)?.is_none() {
                return Err(GuardError::not_found(format!(
                    "branch {} does not exist",
                    branch_id
                )));
            }

            let open = uow.lock_open_registers(branch_id)?;
            if let Some(existing) = open.first() {
                warn!(
                    branch_id,
                    open_register = existing.id,
                    actor = %actor.id,
                    "open register rejected"
                );
                return Err(GuardError::conflict(BRANCH_HAS_OPEN_REGISTER));
            }

            let now = now();
            let register = uow.insert_register(branch_id, location, RegisterStatus::Open)?;
            uow.record_event(&Event::new(
                "register_opened",
                "register",
                register.id,
                serde_json::json!({ "branch_id": branch_id, "location": location }),
                &actor_label(actor),
            ))?;

            let (shift, shift_created) = ensure_open_shift(&uow, &register, now, actor)?;
            uow.commit()?;

            info!(
                register_id = register.id,
                branch_id,
                shift_id = shift.id,
                actor = %actor.id,
                "register opened"
            );
            Ok(OpenedRegister {
                register,
                shift,
                shift_created,
            })
        })
    }

    /// Flip an existing Closed register back to Open
    ///
    /// Already open → returned unchanged. Another open register in the same
    /// branch → Conflict.
    pub fn reopen_register(&self, actor: &Actor, register_id: i64) -> GuardResult<OpenedRegister> {
        self.run("reopen_register", || {
            let uow = self.store.begin()?;

            let mut register = uow.find_register(register_id)?.ok_or_else(|| {
                GuardError::not_found(format!("register {} does not exist", register_id))
            })?;

            let open = uow.lock_open_registers(register.branch_id)?;
            if let Some(other) = open.iter().find(|r| r.id != register.id) {
                warn!(
                    register_id,
                    branch_id = register.branch_id,
                    open_register = other.id,
                    "reopen rejected"
                );
                return Err(GuardError::conflict(BRANCH_HAS_OPEN_REGISTER));
            }

            let now = now();
            let was_open = register.is_open();
            if !was_open {
                uow.set_register_status(register.id, RegisterStatus::Open)?;
                register.status = RegisterStatus::Open;
                uow.record_event(&Event::new(
                    "register_reopened",
                    "register",
                    register.id,
                    serde_json::json!({ "branch_id": register.branch_id }),
                    &actor_label(actor),
                ))?;
            }

            let (shift, shift_created) = ensure_open_shift(&uow, &register, now, actor)?;
            uow.commit()?;

            if !was_open {
                info!(register_id, shift_id = shift.id, actor = %actor.id, "register reopened");
            }
            Ok(OpenedRegister {
                register,
                shift,
                shift_created,
            })
        })
    }

    /// Close a register; an open shift on it is closed at the same instant
    ///
    /// Closing an already closed register with no open shift is a no-op.
    pub fn close_register(&self, actor: &Actor, register_id: i64) -> GuardResult<ClosedRegister> {
        self.run("close_register", || {
            let uow = self.store.begin()?;

            let mut register = uow.find_register(register_id)?.ok_or_else(|| {
                GuardError::not_found(format!("register {} does not exist", register_id))
            })?;
            let open_shifts = uow.lock_open_shifts(register_id)?;
            let now = now();

            if !register.is_open() && open_shifts.is_empty() {
                // Nothing to do; dropping the unit of work releases the lock
                return Ok(ClosedRegister {
                    register,
                    closed_shift: None,
                    closed_at: now,
                });
            }

            if register.is_open() {
                uow.set_register_status(register_id, RegisterStatus::Closed)?;
                register.status = RegisterStatus::Closed;
            }

            let mut closed_shift = None;
            for shift in open_shifts {
                let closed = uow.close_shift(shift.id, now, None)?;
                uow.record_event(&Event::new(
                    "shift_closed",
                    "shift",
                    closed.id,
                    serde_json::json!({ "register_id": register_id, "cascade": true }),
                    &actor_label(actor),
                ))?;
                closed_shift = Some(closed);
            }

            let closed_shift_id = closed_shift.as_ref().map(|s| s.id);
            uow.record_event(&Event::new(
                "register_closed",
                "register",
                register_id,
                serde_json::json!({
                    "branch_id": register.branch_id,
                    "closed_shift": closed_shift_id,
                }),
                &actor_label(actor),
            ))?;
            uow.commit()?;

            info!(
                register_id,
                closed_shift = ?closed_shift_id,
                actor = %actor.id,
                "register closed"
            );
            Ok(ClosedRegister {
                register,
                closed_shift,
                closed_at: now,
            })
        })
    }

    // ========================================================================
    // SHIFTS
    // ========================================================================

    /// Open a shift on `register_id` unless one is already open
    pub fn open_shift(
        &self,
        actor: &Actor,
        register_id: i64,
        employee_id: Option<i64>,
        opened_at: Option<DateTime<Utc>>,
    ) -> GuardResult<Shift> {
        self.run("open_shift", || {
            let uow = self.store.begin()?;

            if uow.find_register(register_id)?.is_none() {
                return Err(GuardError::not_found(format!(
                    "register {} does not exist",
                    register_id
                )));
            }
            if let Some(employee_id) = employee_id {
                if uow.find_employee(employee_id)?.is_none() {
                    return Err(GuardError::not_found(format!(
                        "employee {} does not exist",
                        employee_id
                    )));
                }
            }

            let open = uow.lock_open_shifts(register_id)?;
            if let Some(existing) = open.first() {
                warn!(
                    register_id,
                    open_shift = existing.id,
                    actor = %actor.id,
                    "open shift rejected"
                );
                return Err(GuardError::conflict(REGISTER_HAS_OPEN_SHIFT));
            }

            let shift = uow.insert_shift(register_id, employee_id, opened_at.unwrap_or_else(now))?;
            uow.record_event(&Event::new(
                "shift_opened",
                "shift",
                shift.id,
                serde_json::json!({ "register_id": register_id, "employee_id": employee_id }),
                &actor_label(actor),
            ))?;
            uow.commit()?;

            info!(shift_id = shift.id, register_id, actor = %actor.id, "shift opened");
            Ok(shift)
        })
    }

    /// Close an open shift, storing closing totals when given
    pub fn close_shift(
        &self,
        actor: &Actor,
        shift_id: i64,
        totals: Option<ShiftTotals>,
    ) -> GuardResult<Shift> {
        if let Some(totals) = &totals {
            totals.validate().map_err(GuardError::Invalid)?;
        }

        self.run("close_shift", || {
            let uow = self.store.begin()?;

            let shift = uow.close_shift(shift_id, now(), totals)?;
            uow.record_event(&Event::new(
                "shift_closed",
                "shift",
                shift.id,
                serde_json::json!({ "register_id": shift.register_id, "totals": totals }),
                &actor_label(actor),
            ))?;
            uow.commit()?;

            info!(shift_id, register_id = shift.register_id, actor = %actor.id, "shift closed");
            Ok(shift)
        })
    }

    // ========================================================================
    // RETRY
    // ========================================================================

    /// Run one attempt per unit of work; only Transient failures are retried
    fn run<T, F>(&self, operation: &'static str, mut attempt_fn: F) -> GuardResult<T>
    where
        F: FnMut() -> GuardResult<T>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match attempt_fn() {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(operation, attempt, error = %err, "lock contention, retrying");
                    std::thread::sleep(self.retry.delay_for(attempt));
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Open a shift on `register` unless it already has one
fn ensure_open_shift<U: UnitOfWork>(
    uow: &U,
    register: &Register,
    now: DateTime<Utc>,
    actor: &Actor,
) -> GuardResult<(Shift, bool)> {
    if let Some(existing) = uow.lock_open_shifts(register.id)?.into_iter().next() {
        return Ok((existing, false));
    }

    let shift = uow.insert_shift(register.id, None, now)?;
    uow.record_event(&Event::new(
        "shift_opened",
        "shift",
        shift.id,
        serde_json::json!({ "register_id": register.id, "implicit": true }),
        &actor_label(actor),
    ))?;
    Ok((shift, true))
}

/// Timestamps are stored with microsecond precision
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn actor_label(actor: &Actor) -> String {
    format!("{} ({})", actor.id, actor.role.as_str())
}
