//! Demo backend message feature

use credential_lifecycle::AuthorizingHttpClient;
use rand::RngExt;
use serde::Deserialize;

pub const NO_MESSAGES: &str = "No messages found.";

/// Body of the backend's messages endpoint.
#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub text: String,
}

/// Fetch the message list with a bearer token and pick one at random.
pub async fn fetch_random_message(
    client: &AuthorizingHttpClient,
    url: &str,
) -> credential_lifecycle::Result<String> {
    let body: MessagesResponse = client.get_json(url).await?;
    Ok(pick_random(body.messages))
}

fn pick_random(mut messages: Vec<Message>) -> String {
    if messages.is_empty() {
        return NO_MESSAGES.to_string();
    }
    let index = rand::rng().random_range(0..messages.len());
    messages.swap_remove(index).text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(texts: &[&str]) -> Vec<Message> {
        texts
            .iter()
            .map(|t| Message {
                text: t.to_string(),
            })
            .collect()
    }

    #[test]
    fn empty_list_yields_placeholder() {
        assert_eq!(pick_random(vec![]), NO_MESSAGES);
    }

    #[test]
    fn pick_returns_one_of_the_messages() {
        let texts = ["first", "second", "third"];
        for _ in 0..20 {
            let picked = pick_random(messages(&texts));
            assert!(texts.contains(&picked.as_str()), "unexpected: {picked}");
        }
    }

    #[test]
    fn response_without_messages_field_is_empty() {
        let body: MessagesResponse = serde_json::from_str("{}").unwrap();
        assert!(body.messages.is_empty());
    }
}
