//! Data models for veilshell.

mod persona;
mod session;

pub use persona::{Persona, PersonaProfile, PersonaValidationError};
pub use session::{Session, Tab};
