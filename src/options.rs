use super::*;

#[derive(Clone, Default, Debug, Parser)]
pub struct Options {
    #[arg(long, help = "Load configuration from <CONFIG>.")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Bind listeners to <BIND>. [default: 0.0.0.0]")]
    pub bind: Option<IpAddr>,

    #[arg(long, help = "Spawn <WORKERS> worker runtimes. [default: cpu count]")]
    pub workers: Option<usize>,

    #[arg(long, help = "Mine to payout address <ADDRESS>.")]
    pub address: Option<String>,

    #[arg(long, help = "Poll the coin daemon at <DAEMON_URL>.")]
    pub daemon_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = Options::default();

        assert!(options.config.is_none());
        assert!(options.bind.is_none());
        assert!(options.workers.is_none());
    }

    #[test]
    fn parse_flags() {
        let options = Options::try_parse_from([
            "remora",
            "--bind",
            "127.0.0.1",
            "--workers",
            "2",
            "--daemon-url",
            "http://daemon:18081",
        ])
        .unwrap();

        assert_eq!(options.bind, Some(IpAddr::from([127, 0, 0, 1])));
        assert_eq!(options.workers, Some(2));
        assert_eq!(options.daemon_url, Some("http://daemon:18081".into()));
    }

    #[test]
    fn bad_bind_address_is_rejected() {
        assert!(Options::try_parse_from(["remora", "--bind", "notanip"]).is_err());
    }
}
