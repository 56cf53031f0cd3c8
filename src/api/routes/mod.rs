pub mod health;
pub mod hosts;
pub mod prometheus;
