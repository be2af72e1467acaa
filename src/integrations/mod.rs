//! External service integrations.

pub mod email {
    pub use crate::email::*;
}

pub mod storage {
    pub use crate::repository::*;
}
