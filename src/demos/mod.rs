pub mod inspect;
pub mod simulation;
