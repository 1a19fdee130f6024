//! Factories producing response writers per dispatch.
use std::sync::Arc;

use regex::Regex;

use taskmesh_context::Context;

use super::writer::Route;
use super::ResponseWriter;
use crate::error::MultipleDefaultPublishers;
use crate::Event;
use crate::Promise;
use crate::Publisher;
use crate::TaskMux;

/// Allocate a response writer for every dispatched event.
pub trait ResponseWriterFactory: Send + Sync {
    /// Borrow a writer for one dispatch.
    fn borrow(
        &self,
        context: &Context,
        mux: &Arc<TaskMux>,
        promise: &Arc<Promise>,
        event: &Event,
    ) -> ResponseWriter;

    /// Return a borrowed writer.
    fn release(&self, writer: ResponseWriter) {
        let _ = writer;
    }
}

/// Writers dispatching outputs back into the mux, fully in-process.
#[derive(Default)]
pub struct ProxyResponseFactory;

impl ProxyResponseFactory {
    pub fn new() -> ProxyResponseFactory {
        ProxyResponseFactory
    }
}

impl ResponseWriterFactory for ProxyResponseFactory {
    fn borrow(
        &self,
        context: &Context,
        mux: &Arc<TaskMux>,
        promise: &Arc<Promise>,
        event: &Event,
    ) -> ResponseWriter {
        ResponseWriter::borrowed(context, mux, promise, event, Route::Proxy)
    }
}

/// Writers publishing outputs to a single transport stream.
pub struct StreamResponseFactory {
    publisher: Publisher,
}

impl StreamResponseFactory {
    pub fn new(publisher: Publisher) -> StreamResponseFactory {
        StreamResponseFactory { publisher }
    }
}

impl ResponseWriterFactory for StreamResponseFactory {
    fn borrow(
        &self,
        context: &Context,
        mux: &Arc<TaskMux>,
        promise: &Arc<Promise>,
        event: &Event,
    ) -> ResponseWriter {
        let route = Route::Stream(self.publisher.clone());
        ResponseWriter::borrowed(context, mux, promise, event, route)
    }
}

enum Matcher {
    /// OR-ed list of regular expressions over the event name.
    Patterns(Vec<Regex>),

    /// Arbitrary predicate over the event name.
    Predicate(Box<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Matcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Patterns(patterns) => patterns.iter().any(|pattern| pattern.is_match(name)),
            Matcher::Predicate(predicate) => predicate(name),
        }
    }
}

struct MatchedStream {
    matcher: Matcher,
    publisher: Publisher,
}

/// Writers fanning outputs out to the first publisher whose matcher accepts
/// the incoming event name.
pub struct MultistreamResponseFactory {
    streams: Vec<MatchedStream>,
    default_stream: Option<Publisher>,
}

impl MultistreamResponseFactory {
    /// Start collecting matcher/publisher pairs.
    pub fn builder() -> MultistreamBuilder {
        MultistreamBuilder {
            streams: Vec::new(),
            default_stream: None,
        }
    }

    /// First publisher whose matcher accepts the name; the default publisher
    /// only when no matcher does.
    fn resolve(&self, name: &str) -> Option<Publisher> {
        self.streams
            .iter()
            .find(|stream| stream.matcher.matches(name))
            .map(|stream| stream.publisher.clone())
            .or_else(|| self.default_stream.clone())
    }
}

impl ResponseWriterFactory for MultistreamResponseFactory {
    fn borrow(
        &self,
        context: &Context,
        mux: &Arc<TaskMux>,
        promise: &Arc<Promise>,
        event: &Event,
    ) -> ResponseWriter {
        let route = match self.resolve(event.name()) {
            Some(publisher) => Route::Stream(publisher),
            None => Route::NoMatch,
        };
        ResponseWriter::borrowed(context, mux, promise, event, route)
    }
}

/// Incrementally build a [`MultistreamResponseFactory`].
pub struct MultistreamBuilder {
    streams: Vec<MatchedStream>,
    default_stream: Option<Publisher>,
}

impl MultistreamBuilder {
    /// Route events whose name matches any of the patterns to the publisher.
    pub fn stream<I, S>(mut self, patterns: I, publisher: Publisher) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for pattern in patterns {
            compiled.push(Regex::new(pattern.as_ref())?);
        }
        self.streams.push(MatchedStream {
            matcher: Matcher::Patterns(compiled),
            publisher,
        });
        Ok(self)
    }

    /// Route events whose name matches the regex to the publisher.
    pub fn stream_regex(mut self, pattern: Regex, publisher: Publisher) -> Self {
        self.streams.push(MatchedStream {
            matcher: Matcher::Patterns(vec![pattern]),
            publisher,
        });
        self
    }

    /// Route events accepted by the predicate to the publisher.
    pub fn stream_match<F>(mut self, predicate: F, publisher: Publisher) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.streams.push(MatchedStream {
            matcher: Matcher::Predicate(Box::new(predicate)),
            publisher,
        });
        self
    }

    /// Publisher used when no matcher accepts the event name.
    ///
    /// Only one default publisher is supported.
    pub fn default_stream(mut self, publisher: Publisher) -> anyhow::Result<Self> {
        if self.default_stream.is_some() {
            anyhow::bail!(MultipleDefaultPublishers);
        }
        self.default_stream = Some(publisher);
        Ok(self)
    }

    pub fn build(self) -> MultistreamResponseFactory {
        MultistreamResponseFactory {
            streams: self.streams,
            default_stream: self.default_stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use regex::Regex;

    use super::MultistreamResponseFactory;
    use crate::Publisher;

    fn tagged(tag: &'static str, seen: &Arc<Mutex<Vec<&'static str>>>) -> Publisher {
        let seen = Arc::clone(seen);
        Publisher::from_fn(move |_| {
            seen.lock().unwrap().push(tag);
            Ok(())
        })
    }

    #[tokio::test]
    async fn first_matcher_wins() {
        let context = taskmesh_context::Context::fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = MultistreamResponseFactory::builder()
            .stream(["item1", "item2"], tagged("test1", &seen))
            .unwrap()
            .stream_regex(Regex::new(r"item\d+").unwrap(), tagged("test2", &seen))
            .default_stream(tagged("test3", &seen))
            .unwrap()
            .build();

        for (name, expected) in [
            ("item2", "test1"),
            ("item3", "test2"),
            ("something", "test3"),
        ] {
            let publisher = factory.resolve(name).unwrap();
            let event = crate::Event::with_value(name, &0).unwrap();
            publisher.publish(&context, &[event]).await.unwrap();
            assert_eq!(seen.lock().unwrap().pop(), Some(expected));
        }
    }

    #[test]
    fn no_default_no_match() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = MultistreamResponseFactory::builder()
            .stream(["item1"], tagged("test1", &seen))
            .unwrap()
            .build();
        assert!(factory.resolve("other").is_none());
    }

    #[test]
    fn predicate_matchers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = MultistreamResponseFactory::builder()
            .stream_match(|name| name.ends_with(".done"), tagged("done", &seen))
            .build();
        assert!(factory.resolve("fetch.done").is_some());
        assert!(factory.resolve("fetch").is_none());
    }

    #[test]
    fn rejects_second_default() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = MultistreamResponseFactory::builder()
            .default_stream(tagged("one", &seen))
            .unwrap()
            .default_stream(tagged("two", &seen));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_pattern() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result =
            MultistreamResponseFactory::builder().stream(["(unclosed"], tagged("bad", &seen));
        assert!(result.is_err());
    }
}
