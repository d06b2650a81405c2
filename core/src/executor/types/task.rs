/// Common task interface for executor graph handling.
pub trait TaskLike: Clone + Send + Sync {
    fn id(&self) -> &str;
    fn dependencies(&self) -> &[String];
}
