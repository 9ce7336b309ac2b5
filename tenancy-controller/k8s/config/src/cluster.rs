use std::fmt;

/// A named handle to a cluster. Cheap to clone; the wrapped client shares
/// its connection pool.
#[derive(Clone)]
pub struct Cluster {
    id: String,
    client: kube::Client,
}

impl Cluster {
    pub fn new(id: impl Into<String>, client: kube::Client) -> Self {
        Self {
            id: id.into(),
            client,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster").field("id", &self.id).finish()
    }
}
