//! Integration tests for the AccessPoint controller
//!
//! Tests are organized by the story they tell:
//!
//! - `access_point_lifecycle`: creating, updating and deleting access points
//!   through the controller handle
//!
//! - `fault_handling`: how the controller rides out throttling, slow
//!   activation, out-of-band changes and specs that can never succeed

mod access_point_lifecycle;
mod fault_handling;
mod helpers;
