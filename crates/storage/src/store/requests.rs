#![forbid(unsafe_code)]

use sw_core::Status;
use sw_core::model::IncrementType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateIncrementRequest {
    pub id: String,
    pub kind: IncrementType,
    pub status: Status,
}

impl CreateIncrementRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: IncrementType::default(),
            status: Status::Planning,
        }
    }
}
