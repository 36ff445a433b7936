use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Secrets (keys, HMAC secrets) are deliberately left off this list
    const DISPLAY_ENVS: [&str; 21] = [
        "RUST_LOG",
        "PAYFLOW_HOST",
        "PAYFLOW_PORT",
        "PAYFLOW_DATABASE_URL",
        "PAYFLOW_DEV_MODE",
        "PAYFLOW_USE_X_FORWARDED_FOR",
        "PAYFLOW_USE_FORWARDED",
        "PAYFLOW_USER_HEADER",
        "PAYFLOW_PAYMENT_EXPIRY",
        "PAYFLOW_RECONCILE_INTERVAL",
        "PAYFLOW_RECONCILE_BATCH_SIZE",
        "PAYFLOW_RECONCILE_CONCURRENCY",
        "PAYFLOW_PROVIDER_TIMEOUT",
        "PAYFLOW_STATUS_PUSH_HMAC_CHECKS",
        "PAYFLOW_ALIPAY_APP_ID",
        "PAYFLOW_ALIPAY_GATEWAY_URL",
        "PAYFLOW_ALIPAY_NOTIFY_URL",
        "PAYFLOW_ALIPAY_RETURN_URL",
        "PAYFLOW_WECHAT_APP_ID",
        "PAYFLOW_WECHAT_MCH_ID",
        "PAYFLOW_WECHAT_SIGN_TYPE",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
