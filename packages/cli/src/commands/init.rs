use common::User;

use crate::api::Client;
use crate::config::Config;
use crate::error::Result;

/// Record the server and session cookie after verifying them with a
/// self-check request.
pub fn run(hostname: &str, cookie: &str, report_api: bool) -> Result<()> {
    let config = Config {
        host: hostname.to_string(),
        cookie: cookie.to_string(),
    };

    // try the cookie out before saving anything
    let api = Client::new(&config, report_api)?;
    let user: User = api.get("/users/me", &[])?;

    config.save()?;
    println!("connected to {hostname}; welcome {}", user.name);
    Ok(())
}
