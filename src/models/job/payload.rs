/// Job definition handed to a worker when it takes a job from a group.
#[derive(Debug)]
pub struct Payload {
    id: u64,
    data: serde_json::Value,
    group: String,
}

impl Payload {
    pub fn new(id: u64, data: serde_json::Value, group: String) -> Self {
        Self { id, data, group }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn into_parts(self) -> (u64, serde_json::Value, String) {
        (self.id, self.data, self.group)
    }
}
