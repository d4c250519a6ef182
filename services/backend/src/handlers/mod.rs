pub mod bets;
pub mod external;
pub mod health;
