use prefab::{ambient, ConfigChangeEvent, ConfigUpdate, Context, ContextSet, Provenance, ProvenanceSource};

const CONFIGS: &str = r#"[
  {
    "key": "new-checkout",
    "id": 1,
    "configType": "FEATURE_FLAG",
    "rows": [
      {
        "values": [
          {
            "criteria": [
              {"propertyName": "user.plan", "operator": "PROP_IS_ONE_OF", "valueToMatch": {"stringList": ["pro"]}}
            ],
            "value": {"bool": true}
          },
          {"value": {"bool": false}}
        ]
      }
    ]
  },
  {
    "key": "log-level.simple",
    "id": 2,
    "configType": "LOG_LEVEL",
    "rows": [{"values": [{"value": {"logLevel": "DEBUG"}}]}]
  }
]"#;

pub fn main() {
    env_logger::init();

    let mut config = prefab::ClientConfig::new();
    config.namespace("demo.simple");
    let client = config.to_client();

    client.add_listener(|events: &[ConfigChangeEvent]| {
        for event in events {
            println!("Changed: {} {:?} -> {:?}", event.key, event.old_value, event.new_value);
        }
    });

    // A transport would normally deliver these. Until the first update is applied, the client
    // returns None for every key.
    let configs: Vec<prefab::Config> = serde_json::from_str(CONFIGS).unwrap();
    client.apply_update(ConfigUpdate {
        configs: configs
            .into_iter()
            .map(|config| (config, Provenance::with_location(ProvenanceSource::Remote, "demo")))
            .collect(),
        ..ConfigUpdate::default()
    });
    client.wait_for_initialization().unwrap();

    let request = ContextSet::from(Context::new("user").with("key", "u-1").with("plan", "pro"));
    let enabled = ambient::with_context(request, || client.feature_is_on("new-checkout", None));
    println!("new-checkout: {enabled}");

    println!("Log level: {:?}", client.log_level_for("simple.main"));
}
