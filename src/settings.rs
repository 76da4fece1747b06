use super::*;

#[derive(Debug, Clone)]
pub struct Settings {
    pub upstreams: Vec<UpstreamSettings>,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub pool: bool,
    pub refresh_interval: Duration,
    pub check_interval: Duration,
    pub hashrate_window: Duration,
}

#[derive(Debug, Clone, PartialEq, Display)]
#[display("{name} ({url})")]
pub struct UpstreamSettings {
    pub name: String,
    pub url: String,
}

impl Settings {
    pub fn load(options: Options) -> Result<Self> {
        ensure!(
            !options.upstream.is_empty(),
            "at least one --upstream is required"
        );

        let upstreams = options
            .upstream
            .iter()
            .map(|entry| entry.parse())
            .collect::<Result<Vec<UpstreamSettings>>>()?;

        Ok(Self {
            upstreams,
            username: options.upstream_username.unwrap_or_default(),
            password: options.upstream_password.unwrap_or_default(),
            timeout: Duration::from_secs(options.timeout),
            pool: options.pool,
            refresh_interval: Duration::from_secs(options.refresh_interval),
            check_interval: Duration::from_secs(options.check_interval),
            hashrate_window: Duration::from_secs(options.hashrate_window),
        })
    }

    pub fn backends(&self) -> Result<Vec<Arc<RpcClient>>> {
        self.upstreams
            .iter()
            .map(|upstream| {
                Ok(Arc::new(RpcClient::new(
                    &upstream.name,
                    &upstream.url,
                    &self.username,
                    &self.password,
                    self.timeout,
                    self.pool,
                )?))
            })
            .collect()
    }
}

impl FromStr for UpstreamSettings {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((name, url)) if !name.is_empty() && !url.is_empty() => Ok(Self {
                name: name.into(),
                url: url.into(),
            }),
            _ => bail!("invalid upstream `{s}`, expected NAME=URL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_from_name_url_pair() {
        assert_eq!(
            "main=http://127.0.0.1:9556".parse::<UpstreamSettings>().unwrap(),
            UpstreamSettings {
                name: "main".into(),
                url: "http://127.0.0.1:9556".into(),
            }
        );
    }

    #[test]
    fn upstream_without_separator_is_rejected() {
        assert!("http://127.0.0.1:9556".parse::<UpstreamSettings>().is_err());
        assert!("=http://127.0.0.1:9556".parse::<UpstreamSettings>().is_err());
        assert!("main=".parse::<UpstreamSettings>().is_err());
    }

    #[test]
    fn load_requires_an_upstream() {
        assert!(Settings::load(Options::default()).is_err());
    }

    #[test]
    fn load_resolves_durations() {
        let settings = Settings::load(Options {
            upstream: vec!["main=http://127.0.0.1:9556".into()],
            timeout: 7,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(settings.timeout, Duration::from_secs(7));
        assert!(!settings.pool);
    }
}
