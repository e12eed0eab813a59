pub mod health;
pub mod prescriptions;
