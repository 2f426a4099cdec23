use polystore_types::TypeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlgebraError {
    #[error("Input reference ${index} out of bounds, input row has {arity} fields")]
    InputRefOutOfBounds { index: usize, arity: usize },
    #[error("Operator `{op}` expects {expected} inputs, got {got}")]
    WrongArity { op: &'static str, expected: usize, got: usize },
    #[error("Builder stack underflow in `{0}`")]
    StackUnderflow(&'static str),
    #[error("Builder stack holds {0} nodes at `build`, expected exactly 1")]
    UnfinishedBuild(usize),
    #[error("Set operation inputs have arity {left} and {right}")]
    SetOpArityMismatch { left: usize, right: usize },
    #[error("Join condition must be BOOLEAN, found `{0}`")]
    NonBooleanCondition(String),
    #[error(transparent)]
    Type(#[from] TypeError),
}
