//! Session composition: the coordinator and the status surface.

pub mod coordinator;

pub use coordinator::{Collaborators, SessionCoordinator, SessionStatus};
