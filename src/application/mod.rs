//! Application services: catalog reads, cart and checkout workflow, admin writes, health.

pub mod admin;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod dto;
pub mod error;
pub mod health;
pub mod locks;
pub mod orders;
pub mod pagination;
pub mod payments;
pub mod repos;
