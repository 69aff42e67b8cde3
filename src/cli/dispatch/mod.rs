use std::str::FromStr;

use anyhow::{Context, Result};

use crate::cas::{request::PathMatcher, CasConfig};
use crate::cli::actions::Action;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let server_url = matches
        .get_one::<String>("server-url")
        .map(ToString::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --server-url"))?;

    let mut config = CasConfig::new(server_url);
    config.gateway_mode = matches.get_flag("gateway");
    config.proxy_service_url = matches.get_one::<String>("proxy-service-url").cloned();

    if let Some(paths) = matches.get_many::<String>("exclude-path") {
        config.exclude_paths = paths
            .map(|path| {
                PathMatcher::from_str(path).with_context(|| format!("invalid exclude path: {path}"))
            })
            .collect::<Result<_>>()?;
    }

    if let Some(attributes) = matches.get_many::<String>("extra-attribute") {
        config.extra_attributes_filter = Some(attributes.cloned().collect());
    }

    if let Some(path) = matches.get_one::<String>("logout-path") {
        config.logout_path = path.clone();
    }

    if let Some(path) = matches.get_one::<String>("pgt-callback-path") {
        config.pgt_callback_path = path.clone();
    }

    if let Some(agents) = matches.get_many::<String>("gateway-skip-user-agent") {
        config.gateway_skip_user_agents = agents.cloned().collect();
    }

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        config,
    })
}
