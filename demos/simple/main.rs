use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Limits {
    max_items: u32,
}

pub fn main() {
    let mut client = joystick::ClientConfig::from_env()
        .unwrap()
        .user_id("demo-user")
        .param_value("country", "pt")
        .to_client()
        .unwrap();

    // The first call hits the network. Repeating it within the cache expiration does not.
    let content = client
        .get_content("limits", joystick::ContentOptions::default())
        .unwrap();

    let limits = content
        .and_then(|content| content.data().deserialize::<Limits>().ok())
        // default limits
        .unwrap_or(Limits { max_items: 10 });

    println!("Limits: {:?}", limits);
}
