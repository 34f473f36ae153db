pub mod backend;
pub mod breakpoint;
pub mod bridge;
pub mod config;
pub mod dap;
pub mod error;
pub mod mi;
pub mod session;
pub mod utils;
pub mod variables;

#[cfg(test)]
mod testing;
