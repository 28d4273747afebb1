use std::{sync::Arc, time::Duration};

use anyhow::Context;
use log::{error, info, warn};
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::config::TwilioConfig;


#[derive(Deserialize)]
struct CallResponse {
    sid: String,
}


/// Places the alert phone call.
///
/// Calls are best effort: a failed call is logged and never fails the run.
pub(crate) struct Notifier {
    twilio: Option<Arc<TwilioConfig>>,
    client: reqwest::Client,
}


impl Notifier {
    /// A notifier without telephony settings only logs that it would have called.
    pub(crate) fn new(twilio: Option<&TwilioConfig>) -> anyhow::Result<Self> {
        let timeout = twilio.map_or(30, |t| t.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .context("Failed to build the http client")?;

        if twilio.is_none() {
            warn!("No twilio settings, alert calls are disabled");
        }

        Ok(Self { twilio: twilio.cloned().map(Arc::new), client })
    }

    pub(crate) fn disabled() -> Self {
        Self { twilio: None, client: reqwest::Client::new() }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.twilio.is_some()
    }

    /// Starts the call in the background and returns right away.
    ///
    /// The handle resolves once the provider has answered or the attempt failed.
    pub(crate) fn notify(&self) -> Option<JoinHandle<()>> {
        let Some(twilio) = self.twilio.clone() else {
            info!("Alert triggered but calls are disabled");
            return None;
        };
        let client = self.client.clone();

        Some(tokio::spawn(async move {
            match place_call(&client, &twilio).await {
                Ok(sid) => info!("Call SID: {sid}"),
                Err(e) => error!("Alert call to {} failed: {e:#}", twilio.to),
            }
        }))
    }
}


async fn place_call(client: &reqwest::Client, twilio: &TwilioConfig) -> anyhow::Result<String> {
    let endpoint = format!(
        "{}/2010-04-01/Accounts/{}/Calls.json",
        twilio.api_base.trim_end_matches('/'),
        twilio.account_sid
    );
    info!("Calling {} from {}", twilio.to, twilio.from);

    let response: CallResponse = client
        .post(&endpoint)
        .basic_auth(&twilio.account_sid, Some(&twilio.auth_token))
        .form(&[
            ("To", twilio.to.as_str()),
            ("From", twilio.from.as_str()),
            ("Url", twilio.twiml_url.as_str()),
        ])
        .send()
        .await
        .context("Failed to reach twilio")?
        .error_for_status()
        .context("Twilio rejected the call")?
        .json()
        .await
        .context("Unexpected response from twilio")?;

    Ok(response.sid)
}
