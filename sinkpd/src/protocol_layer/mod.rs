//! Wire formats shared by the PHY driver and the policy engine.

pub mod message;
