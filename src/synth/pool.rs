use std::collections::HashMap;

use super::voice::SynthVoice;

/// Factory for creating voices of a named type.
///
/// This is the "instrument design" layer: register a constructor once,
/// then the pool stamps out identical voices on demand.
pub trait VoiceFactory: Send {
    fn create_voice(&self) -> Box<dyn SynthVoice>;
}

impl<F> VoiceFactory for F
where
    F: Fn() -> Box<dyn SynthVoice> + Send,
{
    fn create_voice(&self) -> Box<dyn SynthVoice> {
        self()
    }
}

/// Free-list allocator for synth voices, keyed by type name.
///
/// Voices cycle between the pool's free lists and the scheduler's active
/// list. Allocation never fails for a registered type: when the free list
/// is empty a fresh instance is built from the registered factory.
pub struct VoicePool {
    factories: HashMap<String, Box<dyn VoiceFactory>>,
    free: HashMap<String, Vec<Box<dyn SynthVoice>>>,
}

impl VoicePool {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            free: HashMap::new(),
        }
    }

    /// Register a voice type under `name`. Re-registering replaces the
    /// factory and drops any free instances built by the old one.
    pub fn register(&mut self, name: impl Into<String>, factory: impl VoiceFactory + 'static) {
        let name = name.into();
        self.free.remove(&name);
        self.factories.insert(name, Box::new(factory));
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered type names, sorted for stable iteration.
    pub fn registered_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Take a free voice of the given type, building one if none is
    /// pooled. Fails only for unregistered type names.
    pub fn get_voice(&mut self, name: &str) -> Result<Box<dyn SynthVoice>, UnknownVoiceType> {
        if let Some(list) = self.free.get_mut(name) {
            if let Some(voice) = list.pop() {
                return Ok(voice);
            }
        }
        match self.factories.get(name) {
            Some(factory) => Ok(factory.create_voice()),
            None => Err(UnknownVoiceType(name.to_owned())),
        }
    }

    /// Return a voice to the free list. The caller must no longer hold
    /// the voice in any active list; the instance is reset before reuse.
    pub fn insert_free_voice(&mut self, name: &str, mut voice: Box<dyn SynthVoice>) {
        voice.reset();
        self.free.entry(name.to_owned()).or_default().push(voice);
    }

    /// Number of pooled (free) instances of a type.
    pub fn free_count(&self, name: &str) -> usize {
        self.free.get(name).map_or(0, Vec::len)
    }
}

impl Default for VoicePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Requested voice type has no registered factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVoiceType(pub String);

impl std::fmt::Display for UnknownVoiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown voice type: {}", self.0)
    }
}

impl std::error::Error for UnknownVoiceType {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voices::SineEnv;

    fn pool() -> VoicePool {
        let mut pool = VoicePool::new();
        pool.register("SineEnv", || Box::new(SineEnv::new()) as Box<dyn SynthVoice>);
        pool
    }

    #[test]
    fn allocates_when_free_list_empty() {
        let mut pool = pool();
        assert_eq!(pool.free_count("SineEnv"), 0);
        let voice = pool.get_voice("SineEnv").unwrap();
        assert_eq!(voice.trigger_param_names(), &["frequency", "amplitude"]);
    }

    #[test]
    fn recycles_freed_voices() {
        let mut pool = pool();
        let voice = pool.get_voice("SineEnv").unwrap();
        pool.insert_free_voice("SineEnv", voice);
        assert_eq!(pool.free_count("SineEnv"), 1);

        let _voice = pool.get_voice("SineEnv").unwrap();
        assert_eq!(pool.free_count("SineEnv"), 0);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let mut pool = pool();
        let err = pool.get_voice("NoSuchVoice").err().unwrap();
        assert_eq!(err, UnknownVoiceType("NoSuchVoice".into()));
    }
}
