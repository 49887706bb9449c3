use super::ConfigArgs;
use crate::context::AppContext;
use anyhow::Result;

/// A single chat turn against a fresh session; prints the intent and, after CONFIGURE,
/// the configuration it produced.
pub async fn run(app: &AppContext, args: &ConfigArgs, user: &str, text: &str) -> Result<()> {
    let session = app.login_with(user, args.to_configuration(app)?).await?;
    let intent = session.chat(text).await;
    println!("{}", serde_json::to_string_pretty(&intent)?);
    if !intent.is_error() {
        println!("{}", super::describe_configuration(&session.config()));
    }
    session.logout().await
}
