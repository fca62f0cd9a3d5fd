use opendal::Operator;

pub type ObjectStorage = Operator;

/// In-memory backend, used by tests and benchmarks.
pub fn new_mem_object_storage(root: &str) -> ObjectStorage {
    let mut builder = opendal::services::Memory::default();
    builder.root(root);
    Operator::new(builder).unwrap().finish()
}

pub fn new_fs_object_storage(path: &str) -> Result<ObjectStorage, opendal::Error> {
    let temp_dir = format!("{}-temp", path);
    let mut builder = opendal::services::Fs::default();
    builder.root(path);
    builder.atomic_write_dir(&temp_dir);
    let obj = Operator::new(builder)?.finish();
    Ok(obj)
}

/// S3 (or any S3-compatible endpoint). An empty `endpoint` falls through to
/// the AWS default resolution, mirroring the usual client behavior.
pub fn new_s3_object_storage(
    bucket: &str,
    endpoint: &str,
    region: &str,
    access_key: &str,
    secret_key: &str,
) -> Result<ObjectStorage, opendal::Error> {
    let mut builder = opendal::services::S3::default();
    builder.bucket(bucket);
    builder.region(region);
    if !endpoint.is_empty() {
        builder.endpoint(endpoint);
    }
    if !access_key.is_empty() {
        builder.access_key_id(access_key);
    }
    if !secret_key.is_empty() {
        builder.secret_access_key(secret_key);
    }
    let obj = Operator::new(builder)?.finish();
    Ok(obj)
}
