//! End-to-end pipeline flow exercised through the public API only: extract an
//! inbound parent, nest client pipelines under a server span, and inject the
//! active identity into outbound carriers.

#[cfg(test)]
mod pipeline {
    use std::borrow::Cow;
    use std::collections::HashMap;
    use std::error::Error;

    use instrumenter::pipeline::AttributesExtractor;
    use instrumenter::propagation::{TextMapPropagator, TraceContextPropagator};
    use instrumenter::span::{InMemorySpanSink, SpanId, SpanKind, Status, TraceId};
    use instrumenter::{AttributeMap, CallDepth, Context, Instrumenter, KeyValue, SpanKey, Value};

    struct Inbound {
        method: &'static str,
        route: &'static str,
        headers: HashMap<String, String>,
    }

    struct Outbound {
        method: &'static str,
        url: &'static str,
    }

    struct Statement {
        sql: &'static str,
    }

    struct Reply {
        status: u16,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct ConnectionRefused;

    struct ServerAttributes;

    impl AttributesExtractor<Inbound, Reply> for ServerAttributes {
        fn span_key(&self) -> Option<SpanKey> {
            Some(SpanKey::Server)
        }

        fn on_start(&self, attributes: &mut AttributeMap, _cx: &Context, request: &Inbound) {
            attributes.insert(KeyValue::new("http.request.method", request.method));
            attributes.insert(KeyValue::new("http.route", request.route));
        }

        fn on_end(
            &self,
            attributes: &mut AttributeMap,
            _cx: &Context,
            _request: &Inbound,
            response: Option<&Reply>,
            _error: Option<&(dyn Error + 'static)>,
        ) {
            if let Some(reply) = response {
                attributes.insert(KeyValue::new(
                    "http.response.status_code",
                    reply.status as i64,
                ));
            }
        }
    }

    struct ClientAttributes;

    impl AttributesExtractor<Outbound, Reply> for ClientAttributes {
        fn span_key(&self) -> Option<SpanKey> {
            Some(SpanKey::HttpClient)
        }

        fn on_start(&self, attributes: &mut AttributeMap, _cx: &Context, request: &Outbound) {
            attributes.insert(KeyValue::new("http.request.method", request.method));
            attributes.insert(KeyValue::new("url.full", request.url));
        }
    }

    struct DbAttributes;

    impl AttributesExtractor<Statement, u64> for DbAttributes {
        fn span_key(&self) -> Option<SpanKey> {
            Some(SpanKey::DbClient)
        }

        fn on_start(&self, attributes: &mut AttributeMap, _cx: &Context, request: &Statement) {
            attributes.insert(KeyValue::new("db.query.text", request.sql));
        }
    }

    fn server(sink: &InMemorySpanSink) -> Instrumenter<Inbound, Reply> {
        Instrumenter::builder(|r: &Inbound| Cow::Owned(format!("{} {}", r.method, r.route)))
            .with_kind(SpanKind::Server)
            .with_attributes_extractor(ServerAttributes)
            .with_sink(sink.clone())
            .build()
            .unwrap()
    }

    fn http_client(sink: &InMemorySpanSink) -> Instrumenter<Outbound, Reply> {
        Instrumenter::builder(|r: &Outbound| Cow::Borrowed(r.method))
            .with_kind(SpanKind::Client)
            .with_attributes_extractor(ClientAttributes)
            .with_sink(sink.clone())
            .build()
            .unwrap()
    }

    fn db_client(sink: &InMemorySpanSink) -> Instrumenter<Statement, u64> {
        Instrumenter::builder(|r: &Statement| Cow::Borrowed(r.sql))
            .with_kind(SpanKind::Client)
            .with_attributes_extractor(DbAttributes)
            .with_sink(sink.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn missing_inbound_header_starts_a_new_trace() {
        let sink = InMemorySpanSink::new();
        let server = server(&sink);
        let propagator = TraceContextPropagator::new();

        let request = Inbound {
            method: "GET",
            route: "/users/{id}",
            headers: HashMap::new(),
        };
        let parent_cx = propagator.extract_with_context(&Context::new(), &request.headers);
        assert!(!parent_cx.has_active_span());

        assert!(server.should_start(&parent_cx, &request));
        let cx = server.start(&parent_cx, &request);
        server.end(&cx, &request, Some(&Reply { status: 200 }), None);

        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].span_context.is_valid());
        assert!(spans[0].span_context.trace_flags().is_sampled());
        assert_eq!(spans[0].parent_span_id, SpanId::INVALID);
        assert_eq!(spans[0].name, "GET /users/{id}");
        assert_eq!(spans[0].kind, SpanKind::Server);
        assert_eq!(
            spans[0].attributes.get("http.route"),
            Some(&Value::from("/users/{id}"))
        );
        assert_eq!(
            spans[0].attributes.get("http.response.status_code"),
            Some(&Value::I64(200))
        );
    }

    #[test]
    fn inbound_traceparent_continues_the_remote_trace() {
        let sink = InMemorySpanSink::new();
        let server = server(&sink);
        let propagator = TraceContextPropagator::new();

        let mut request = Inbound {
            method: "PUT",
            route: "/orders/{id}",
            headers: HashMap::new(),
        };
        request.headers.insert(
            "traceparent".to_string(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
        );

        let parent_cx = propagator.extract_with_context(&Context::new(), &request.headers);
        let remote = parent_cx.span().map(|r| r.span_context().clone()).unwrap();
        assert!(remote.is_remote());

        let cx = server.start(&parent_cx, &request);
        server.end(&cx, &request, Some(&Reply { status: 204 }), None);

        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].span_context.trace_id(),
            TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap()
        );
        assert_eq!(
            spans[0].parent_span_id,
            SpanId::from_hex("b7ad6b7169203331").unwrap()
        );
        assert!(spans[0].span_context.trace_flags().is_sampled());
        assert_ne!(spans[0].span_context.span_id(), spans[0].parent_span_id);
    }

    #[test]
    fn layered_clients_suppress_same_key_but_not_other_kinds() {
        let sink = InMemorySpanSink::new();
        let server = server(&sink);
        let outer = http_client(&sink);
        let transport = http_client(&sink);
        let db = db_client(&sink);

        let inbound = Inbound {
            method: "GET",
            route: "/reports",
            headers: HashMap::new(),
        };
        let server_cx = server.start(&Context::new(), &inbound);

        let outbound = Outbound {
            method: "GET",
            url: "https://api.internal/widgets",
        };
        assert!(outer.should_start(&server_cx, &outbound));
        let client_cx = outer.start(&server_cx, &outbound);

        // The transport layer below the client shares its span key.
        let low_level = Outbound {
            method: "GET",
            url: "https://api.internal/widgets",
        };
        assert!(!transport.should_start(&client_cx, &low_level));

        // A database call below the client is a different key.
        let statement = Statement {
            sql: "SELECT * FROM widgets",
        };
        assert!(db.should_start(&client_cx, &statement));
        let db_cx = db.start(&client_cx, &statement);
        db.end(&db_cx, &statement, Some(&42), None);

        outer.end(&client_cx, &outbound, Some(&Reply { status: 200 }), None);
        server.end(&server_cx, &inbound, Some(&Reply { status: 200 }), None);

        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 3);

        let trace_id = spans[0].span_context.trace_id();
        assert!(spans.iter().all(|s| s.span_context.trace_id() == trace_id));

        let server_span = spans.iter().find(|s| s.kind == SpanKind::Server).unwrap();
        let client_span = spans.iter().find(|s| s.name == "GET").unwrap();
        let db_span = spans
            .iter()
            .find(|s| s.name == "SELECT * FROM widgets")
            .unwrap();
        assert_eq!(
            client_span.parent_span_id,
            server_span.span_context.span_id()
        );
        assert_eq!(db_span.parent_span_id, client_span.span_context.span_id());
    }

    #[test]
    fn recursive_entry_points_collapse_to_one_span() {
        // An adapter for a library whose public entry point is implemented in
        // terms of itself, so interception re-enters on redirects. Only the
        // outermost invocation may start and end the span.
        struct HttpLib;

        fn intercepted_get(
            client: &Instrumenter<Outbound, Reply>,
            request: &Outbound,
            redirects: usize,
        ) {
            let cx = if CallDepth::enter::<HttpLib>() == 1 {
                Some(client.start(&Context::new(), request))
            } else {
                None
            };

            if redirects > 0 {
                intercepted_get(client, request, redirects - 1);
            }

            if CallDepth::exit::<HttpLib>() == 0 {
                if let Some(cx) = cx {
                    client.end(&cx, request, Some(&Reply { status: 200 }), None);
                }
            }
        }

        let sink = InMemorySpanSink::new();
        let client = http_client(&sink);
        let outbound = Outbound {
            method: "GET",
            url: "https://redirecting/resource",
        };

        intercepted_get(&client, &outbound, 2);

        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "GET");
    }

    #[test]
    fn outbound_inject_round_trips_the_active_identity() {
        let sink = InMemorySpanSink::new();
        let client = http_client(&sink);
        let propagator = TraceContextPropagator::new();

        let outbound = Outbound {
            method: "POST",
            url: "https://billing/charge",
        };
        let cx = client.start(&Context::new(), &outbound);
        let recorded = cx.span().map(|r| r.span_context().clone()).unwrap();

        let mut headers = HashMap::new();
        propagator.inject_context(&cx, &mut headers);
        client.end(&cx, &outbound, Some(&Reply { status: 201 }), None);

        let downstream_cx = propagator.extract_with_context(&Context::new(), &headers);
        let remote = downstream_cx
            .span()
            .map(|r| r.span_context().clone())
            .unwrap();

        assert_eq!(remote.trace_id(), recorded.trace_id());
        assert_eq!(remote.span_id(), recorded.span_id());
        assert!(remote.is_remote());
        assert!(remote.is_sampled());
    }

    #[test]
    fn current_context_carries_the_pipeline_across_helpers() {
        // Interception code that relies on the thread-local current context
        // rather than threading `Context` values by hand.
        let sink = InMemorySpanSink::new();
        let server = server(&sink);
        let client = http_client(&sink);
        let propagator = TraceContextPropagator::new();

        let inbound = Inbound {
            method: "GET",
            route: "/fanout",
            headers: HashMap::new(),
        };
        let server_cx = server.start(&Context::current(), &inbound);
        let mut captured_headers = HashMap::new();
        {
            let _server_guard = server_cx.clone().attach();

            let outbound = Outbound {
                method: "GET",
                url: "https://downstream/a",
            };
            let client_cx = client.start(&Context::current(), &outbound);
            {
                let _client_guard = client_cx.clone().attach();
                propagator.inject(&mut captured_headers);
            }
            client.end(&client_cx, &outbound, Some(&Reply { status: 200 }), None);
        }
        server.end(&server_cx, &inbound, Some(&Reply { status: 200 }), None);

        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 2);
        let client_span = spans.iter().find(|s| s.kind == SpanKind::Client).unwrap();
        let server_span = spans.iter().find(|s| s.kind == SpanKind::Server).unwrap();
        assert_eq!(
            client_span.parent_span_id,
            server_span.span_context.span_id()
        );

        let injected = captured_headers.get("traceparent").unwrap();
        assert!(injected.contains(&client_span.span_context.trace_id().to_string()));
        assert!(injected.contains(&client_span.span_context.span_id().to_string()));
    }

    #[test]
    fn failed_call_reports_error_status() {
        let sink = InMemorySpanSink::new();
        let client = http_client(&sink);

        let outbound = Outbound {
            method: "GET",
            url: "https://flaky/ping",
        };
        let cx = client.start(&Context::new(), &outbound);
        client.end(&cx, &outbound, None, Some(&ConnectionRefused));

        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("connection refused"));
        assert_eq!(
            spans[0].recorded_error.as_deref(),
            Some("connection refused")
        );
    }
}
