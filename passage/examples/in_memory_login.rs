use std::{sync::Arc, time::Duration};

use clap::Parser;
use passage::{
    providers::in_memory::InMemoryIdentityProvider, AuthOptions, AuthScheme, AuthStatus, ClientId,
    Credentials, Host, MemoryStorage, NamespacedStorage, Password, SharedHeaders, Storage,
    UserAttribute, UserPoolId, Username,
};
use passage_clock::DurationSecs;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The user pool to authenticate against
    #[arg(short = 'p', long, env = "AWS_COGNITO_USER_POOL_ID", default_value = "us-east-1_Demo")]
    user_pool_id: UserPoolId,

    /// The client ID of the application
    #[arg(short, long, env = "AWS_COGNITO_CLIENT_ID", default_value = "demo")]
    client_id: ClientId,

    /// The user to sign in as
    #[arg(short, long, env = "PASSAGE_USERNAME", default_value = "demo")]
    username: Username,

    /// The user's password
    #[arg(short = 's', long, env = "PASSAGE_PASSWORD", hide_env_values = true, default_value = "demo")]
    password: Password,

    /// How long issued sessions last, in seconds
    #[arg(long, default_value_t = 30)]
    session_secs: u64,

    /// How often the session is refreshed, in seconds
    #[arg(short, long, default_value_t = 10)]
    refresh_secs: u64,

    /// How long to keep the session alive before signing out, in seconds
    #[arg(long, default_value_t = 35)]
    run_secs: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let headers = SharedHeaders::new();

    let provider =
        InMemoryIdentityProvider::new(NamespacedStorage::new(storage.clone(), opts.client_id.as_str()))
            .with_session_duration(DurationSecs(opts.session_secs))
            .with_latency(Duration::from_millis(150));
    provider.add_user(
        opts.username.clone(),
        opts.password.clone(),
        vec![UserAttribute::new("email", format!("{}@example.com", opts.username))],
        vec!["demo".to_owned()],
    );

    let options = AuthOptions::default()
        .with_user_pool_id(opts.user_pool_id)
        .with_client_id(opts.client_id)
        .with_refresh_interval(Some(Duration::from_secs(opts.refresh_secs)));

    let scheme = AuthScheme::new(options, Host::new(headers.clone(), storage), provider)?;

    let mounted = scheme.mount().await;
    tracing::info!(outcome = ?mounted, "scheme mounted");

    scheme
        .login(&Credentials {
            username: opts.username,
            password: opts.password,
        })
        .await?;

    let mut users = scheme.user_watcher();
    tokio::spawn(async move {
        while users.changed().await.is_ok() {
            let user = users.current();
            tracing::info!(
                signed_in = user.is_some(),
                groups = ?user.as_ref().map(|u| u.groups().to_vec()),
                "user changed"
            );
        }
    });

    let mut interval = time::interval(Duration::from_secs(5));
    let deadline = time::Instant::now() + Duration::from_secs(opts.run_secs);
    while time::Instant::now() < deadline {
        interval.tick().await;

        let status = scheme.status();
        let token = scheme.token();
        match status {
            AuthStatus::Authenticated | AuthStatus::Refreshing => tracing::debug!(
                ?status,
                token = ?token,
                header_installed = headers.snapshot().contains_key(http::header::AUTHORIZATION),
                "pulled session state"
            ),
            _ => tracing::warn!(?status, "session not established"),
        }
    }

    tracing::info!(stats = ?scheme.provider().stats(), "signing out");
    scheme.logout().await;
    Ok(())
}
