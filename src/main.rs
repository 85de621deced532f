//! Mesh App host
//!
//! Runs every service linked into the binary. Services declared with
//! `mesh_app::service!` in linked crates are picked up automatically.
//!
//! The process exits with status 0 on every path, including startup failures.

fn main() {
    mesh_app::run("mesh");
}
