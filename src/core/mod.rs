// Domain-layer modules and shared errors/models
pub mod intake {
    pub use crate::intake::*;
}

pub mod lifecycle {
    pub use crate::lifecycle::*;
}

pub mod nurture {
    pub use crate::nurture::*;
}

pub mod scoring {
    pub use crate::intent::*;
    pub use crate::tiering::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
