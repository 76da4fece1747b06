use super::*;

#[derive(Debug, Parser)]
#[command(version, about = "Getwork mining proxy")]
pub(crate) struct Arguments {
    #[command(flatten)]
    pub(crate) options: Options,
}

impl Arguments {
    pub(crate) async fn run(self, cancel_token: CancellationToken) -> Result {
        let settings = Settings::load(self.options)?;
        let server = Arc::new(ProxyServer::new(
            settings.backends()?,
            settings.hashrate_window,
        ));

        for upstream in &settings.upstreams {
            info!("Proxying for upstream {upstream}");
        }

        server.refresh_template().await;

        let mut tasks = JoinSet::new();
        server.spawn(&settings, cancel_token, &mut tasks);

        while tasks.join_next().await.is_some() {}

        Ok(())
    }
}
