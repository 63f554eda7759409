// Entity Models
//
// Plain records mirroring the SQLite rows. Identity is the integer primary
// key assigned by the database; the guard in crate::guard owns every
// transition of Register.status and Shift.closed_at.

pub mod branch;
pub mod employee;
pub mod register;
pub mod shift;

pub use branch::Branch;
pub use employee::{Actor, Employee, Role};
pub use register::{Register, RegisterStatus};
pub use shift::{Shift, ShiftTotals};
