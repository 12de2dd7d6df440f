use thiserror::Error;

use crate::conventions::MAX_STUDENTS;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid student index {0}: expected 1..={max}", max = MAX_STUDENTS)]
    InvalidStudentIndex(u32),

    #[error("invalid student count {0}: expected 1..={max}", max = MAX_STUDENTS)]
    InvalidStudentCount(u32),
}
