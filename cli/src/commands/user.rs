use anyhow::Result;

use larder_core::service::LarderService;

pub(crate) fn cmd_user_register(
    svc: &LarderService,
    username: &str,
    password: &str,
    json: bool,
) -> Result<()> {
    let user = svc.register(username, password)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        let name = &user.username;
        println!("Registered user: {name} (id: {})", user.id);
        println!("Use it with: larder --user {name} <command>  (or set LARDER_USER)");
    }
    Ok(())
}

/// Issue an API session token for use against `larder serve`.
pub(crate) fn cmd_user_login(
    svc: &LarderService,
    username: &str,
    password: &str,
    json: bool,
) -> Result<()> {
    let session = svc.login(username, password)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        println!("{}", session.token);
        eprintln!("Include in requests: Authorization: Bearer <token>");
    }
    Ok(())
}
