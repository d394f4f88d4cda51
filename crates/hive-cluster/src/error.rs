use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClusterError {
    #[snafu(display("invalid configuration: {message}"))]
    InvalidConfig { message: String },
    #[snafu(display("database error: {source}"))]
    Database { source: hive_db::DbError },
    #[snafu(display("durable store error: {source}"))]
    Store { source: hive_store::StoreError },
    #[snafu(display("http server error: {source}"))]
    Server { source: hive_server::ServerError },
}

impl From<hive_db::DbError> for ClusterError {
    fn from(source: hive_db::DbError) -> Self {
        ClusterError::Database { source }
    }
}

impl From<hive_store::StoreError> for ClusterError {
    fn from(source: hive_store::StoreError) -> Self {
        ClusterError::Store { source }
    }
}

impl From<hive_server::ServerError> for ClusterError {
    fn from(source: hive_server::ServerError) -> Self {
        ClusterError::Server { source }
    }
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;
