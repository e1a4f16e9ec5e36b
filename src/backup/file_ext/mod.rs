/// Suffix a pipeline stage appends to the artifact it produces.
pub trait FileExtProvider {
    fn file_ext(&self) -> &'static str;
}
