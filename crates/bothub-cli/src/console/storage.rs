use serde_json::{Map, Value};
use tracing::debug;

use crate::api::{ApiClient, Properties, PropertyValue};
use crate::error::Result;

pub const CONSOLE_CHANNEL: &str = "cli";
pub const CONSOLE_USER: &str = "localuser";

/// Remote storage the bot reads and writes through.
pub trait StorageClient {
    fn get_project_data(&self) -> Result<Properties>;
    fn set_project_data(&self, data: &Properties) -> Result<()>;
    fn get_user_data(&self, channel: &str, user_id: &str, key: Option<&str>) -> Result<Value>;
    fn set_user_data(&self, channel: &str, user_id: &str, data: &Map<String, Value>)
    -> Result<()>;
}

pub struct HttpStorageClient {
    api: ApiClient,
    project_id: i64,
}

impl HttpStorageClient {
    pub fn new(api: ApiClient, project_id: i64) -> Self {
        Self { api, project_id }
    }
}

impl StorageClient for HttpStorageClient {
    fn get_project_data(&self) -> Result<Properties> {
        self.api.get_project_properties(self.project_id)
    }

    fn set_project_data(&self, data: &Properties) -> Result<()> {
        self.api.set_project_properties(self.project_id, data)?;
        Ok(())
    }

    fn get_user_data(&self, channel: &str, user_id: &str, key: Option<&str>) -> Result<Value> {
        self.api
            .get_user_properties(self.project_id, channel, user_id, key)
    }

    fn set_user_data(
        &self,
        channel: &str,
        user_id: &str,
        data: &Map<String, Value>,
    ) -> Result<()> {
        self.api
            .set_user_properties(self.project_id, channel, user_id, data)?;
        Ok(())
    }
}

/// Project data is served from a local copy. Writes land in the copy and in
/// a pending set that `store_project_data` flushes in one request.
pub struct CachedStorage<S> {
    client: S,
    properties: Properties,
    pending: Properties,
    current_user: (String, String),
}

impl<S: StorageClient> CachedStorage<S> {
    pub fn new(client: S) -> Self {
        Self {
            client,
            properties: Properties::new(),
            pending: Properties::new(),
            current_user: (CONSOLE_CHANNEL.into(), CONSOLE_USER.into()),
        }
    }

    pub fn client(&self) -> &S {
        &self.client
    }

    pub fn load_project_data(&mut self) -> Result<&Properties> {
        self.properties = self.client.get_project_data()?;
        debug!(keys = self.properties.len(), "project data loaded");
        Ok(&self.properties)
    }

    pub fn project_data(&self) -> &Properties {
        &self.properties
    }

    pub fn get_project_data(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn set_project_data(&mut self, data: Properties) -> &Properties {
        for (key, value) in data {
            self.properties.insert(key.clone(), value.clone());
            self.pending.insert(key, value);
        }
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn store_project_data(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.client.set_project_data(&self.pending)?;
        }
        self.pending.clear();
        Ok(())
    }

    pub fn get_current_user_data(&self, key: Option<&str>) -> Result<Value> {
        let (channel, user_id) = &self.current_user;
        self.client.get_user_data(channel, user_id, key)
    }

    pub fn set_current_user_data(&self, data: &Map<String, Value>) -> Result<()> {
        let (channel, user_id) = &self.current_user;
        self.client.set_user_data(channel, user_id, data)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    pub(crate) struct MemoryStorage {
        pub project: Mutex<Properties>,
        pub writes: Mutex<Vec<Properties>>,
        pub user_writes: Mutex<Vec<(String, String, Map<String, Value>)>>,
    }

    impl StorageClient for MemoryStorage {
        fn get_project_data(&self) -> Result<Properties> {
            Ok(self.project.lock().clone())
        }

        fn set_project_data(&self, data: &Properties) -> Result<()> {
            self.project.lock().extend(data.clone());
            self.writes.lock().push(data.clone());
            Ok(())
        }

        fn get_user_data(&self, channel: &str, user_id: &str, key: Option<&str>) -> Result<Value> {
            let mut merged = Map::new();
            for (ch, user, data) in self.user_writes.lock().iter() {
                if ch == channel && user == user_id {
                    merged.extend(data.clone());
                }
            }
            if merged.is_empty() {
                return Ok(Value::Null);
            }
            Ok(match key {
                Some(key) => merged.remove(key).unwrap_or(Value::Null),
                None => Value::Object(merged),
            })
        }

        fn set_user_data(
            &self,
            channel: &str,
            user_id: &str,
            data: &Map<String, Value>,
        ) -> Result<()> {
            self.user_writes
                .lock()
                .push((channel.into(), user_id.into(), data.clone()));
            Ok(())
        }
    }

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), PropertyValue::from(value.clone())))
            .collect()
    }

    #[test]
    fn writes_are_cached_until_stored() {
        let backend = MemoryStorage::default();
        backend
            .project
            .lock()
            .insert("greeting".into(), PropertyValue::String("hi".into()));
        let mut storage = CachedStorage::new(backend);
        storage.load_project_data().unwrap();

        storage.set_project_data(props(&[("count", json!(1))]));
        storage.set_project_data(props(&[("count", json!(2)), ("flag", json!(true))]));
        assert_eq!(
            storage.get_project_data("count"),
            Some(&PropertyValue::from(json!(2)))
        );
        assert!(storage.client().writes.lock().is_empty());

        storage.store_project_data().unwrap();
        storage.store_project_data().unwrap();
        let writes = storage.client().writes.lock().clone();
        assert_eq!(writes, vec![props(&[("count", json!(2)), ("flag", json!(true))])]);
        assert!(!storage.has_pending());
    }

    #[test]
    fn current_user_is_the_console_user() {
        let mut data = Map::new();
        data.insert("name".into(), json!("tester"));
        let storage = CachedStorage::new(MemoryStorage::default());
        storage.set_current_user_data(&data).unwrap();
        assert_eq!(
            storage.client().user_writes.lock()[0],
            ("cli".to_string(), "localuser".to_string(), data)
        );
        assert_eq!(
            storage.get_current_user_data(None).unwrap(),
            json!({"name": "tester"})
        );
        assert_eq!(
            storage.get_current_user_data(Some("name")).unwrap(),
            json!("tester")
        );
    }

    #[test]
    fn http_storage_uses_project_endpoints() {
        let transport = MockTransport::new();
        transport.record_json(200, json!({"data": null}));
        transport.record_json(200, json!({"data": true}));
        transport.record_json(200, json!({"data": {"name": "tester"}}));
        let api = ApiClient::new("https://a.com", transport.clone())
            .with_token_expiry_check(false)
            .with_auth_token("testtoken");
        let client = HttpStorageClient::new(api, 7);

        assert!(client.get_project_data().unwrap().is_empty());
        client
            .set_project_data(&props(&[("k", json!("v"))]))
            .unwrap();
        assert_eq!(
            client.get_user_data("cli", "localuser", None).unwrap(),
            json!({"name": "tester"})
        );
        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://a.com/projects/7/properties");
        assert_eq!(requests[1].url, "https://a.com/projects/7/properties");
        assert_eq!(
            requests[2].url,
            "https://a.com/projects/7/user-properties/channels/cli/users/localuser"
        );
    }
}
