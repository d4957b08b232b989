use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const DYNAMODB_PORT: u16 = 8000;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DynamoDbLocalConfig {
    #[builder(default = "2.5.2".to_string())]
    tag: String,
    /// Keep tables in memory instead of on the container filesystem.
    #[builder(default = true)]
    in_memory: bool,
}

/// Test fixture for a disposable DynamoDB Local server.
pub struct DynamoDbLocal {
    container: ContainerAsync<GenericImage>,
}

impl DynamoDbLocal {
    /// Starts a DynamoDB Local container suitable for integration tests.
    pub async fn new(config: DynamoDbLocalConfig) -> Result<Self> {
        let mut cmd = vec!["-jar", "DynamoDBLocal.jar", "-sharedDb"];
        if config.in_memory {
            cmd.push("-inMemory");
        }

        let container = GenericImage::new("amazon/dynamodb-local", &config.tag)
            .with_exposed_port(DYNAMODB_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Initializing DynamoDB Local"))
            .with_cmd(cmd)
            .start()
            .await?;

        Ok(Self { container })
    }

    pub async fn host(&self) -> Result<String> {
        Ok(self.container.get_host().await?.to_string())
    }

    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(DYNAMODB_PORT).await?)
    }

    /// Endpoint override for the AWS SDK, e.g. `http://127.0.0.1:32768`.
    pub async fn endpoint(&self) -> Result<String> {
        Ok(format!("http://{}:{}", self.host().await?, self.port().await?))
    }
}
