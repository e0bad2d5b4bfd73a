/**
 * Routes Module
 * API route handlers
 */

pub mod auth;
pub mod components;
pub mod health;
pub mod projects;
