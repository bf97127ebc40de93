use {
    anyhow::{Result, bail},
    chatrelay_auth::TokenService,
    chatrelay_config::RelayConfig,
    chatrelay_gateway::auth::rejection_reason,
    clap::Subcommand,
    serde_json::json,
};

#[derive(Subcommand)]
pub enum TokenAction {
    /// Issue a session token signed with the configured secret.
    Issue {
        #[arg(long)]
        user_id: i64,
        /// Display name carried in the token.
        #[arg(long)]
        name: String,
    },
    /// Verify a token and print the identity it carries.
    Inspect { token: String },
}

pub fn handle_token(action: TokenAction, config: &RelayConfig) -> Result<()> {
    let tokens = configured_tokens(config)?;
    match action {
        TokenAction::Issue { user_id, name } => {
            println!("{}", tokens.issue(user_id, &name)?);
            Ok(())
        },
        TokenAction::Inspect { token } => {
            println!("{}", inspect(&tokens, &token)?);
            Ok(())
        },
    }
}

fn configured_tokens(config: &RelayConfig) -> Result<TokenService> {
    let Some(secret) = config.token_secret() else {
        bail!("auth.token_secret is not set (config file or CHATRELAY_TOKEN_SECRET)");
    };
    Ok(TokenService::new(secret, config.auth.token_ttl_hours))
}

fn inspect(tokens: &TokenService, token: &str) -> Result<String> {
    match tokens.verify(token) {
        Ok(identity) => Ok(serde_json::to_string_pretty(&json!({
            "valid": true,
            "user_id": identity.id,
            "display_name": identity.display_name,
        }))?),
        Err(e) => bail!("token rejected ({}): {e}", rejection_reason(&e)),
    }
}
