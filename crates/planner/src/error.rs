use polystore_algebra::AlgebraError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("No physical plan found for the required traits")]
    NoPlanFound,
    #[error("Planner iteration budget exhausted before any physical plan")]
    BudgetExhausted,
    #[error(transparent)]
    Algebra(#[from] AlgebraError),
}
