pub mod roster;
pub mod staff;
