//! Produce a bcrypt hash suitable for the ADMIN_PASSWORD_HASH env var.

use bcrypt::{hash, DEFAULT_COST};

fn main() {
    let Some(password) = std::env::args().nth(1) else {
        eprintln!("usage: hash-password <PASSWORD>");
        std::process::exit(2);
    };

    match hash(&password, DEFAULT_COST) {
        Ok(hashed) => {
            println!("# bcrypt, cost {}", DEFAULT_COST);
            println!("ADMIN_PASSWORD_HASH={}", hashed);
        }
        Err(e) => {
            eprintln!("failed to hash password: {}", e);
            std::process::exit(1);
        }
    }
}
