//! The `easyscience_core` crate describes scientific model quantities and fits them to data.
//! Every object lives in a [`Session`], which also owns the undo/redo history and the
//! constraint registry.
//!
//! Key components:
//! - **Units**: `Unit` with SI-dimension bookkeeping and conversion factors.
//! - **Variables**: `DescriptorNumber`, `DescriptorArray`, `Parameter` and friends, with
//!   variance propagation through arithmetic.
//! - **Session**: object map keyed by unique name, snapshot-based undo/redo with macros.
//! - **Constraints**: numeric, bound, object, multi-object and functional relations between
//!   parameters, evaluated by a small bytecode VM (`expression`).
//! - **Objects & models**: groups and collections of parameters, `Line` and `Polynomial`.
//! - **Fitting**: Levenberg–Marquardt over free parameters, Jacobians from `Dual` numbers.
//! - **Serialization**: `@class`-tagged dictionaries and JSON.

pub mod autodiff;
pub mod constraints;
pub mod error;
pub mod expression;
pub mod fitting;
pub mod models;
pub mod objects;
pub mod serialization;
pub mod session;
pub mod traits;
pub mod units;
pub mod variable;

pub use constraints::{Bound, Comparison, Constraint, ConstraintId};
pub use error::{CoreError, Result};
pub use fitting::{FitResults, FitSettings, Fitter};
pub use models::{Coefficient, Line, Polynomial};
pub use objects::{BaseCollection, BaseObj, Object};
pub use session::{Session, SessionSettings};
pub use traits::{FitModel, Scalar};
pub use units::Unit;
pub use variable::{
    Descriptor, DescriptorAnyType, DescriptorArray, DescriptorBool, DescriptorNumber,
    DescriptorStr, Parameter,
};
