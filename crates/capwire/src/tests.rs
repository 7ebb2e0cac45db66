use crate::*;

async fn roundtrip(value: &Value, registry: &Registry) -> Value {
    let text = encode(value, registry).await.unwrap();
    decode(&text, registry).unwrap()
}

fn noop(name: &str) -> Value {
    Value::Function(Function::sync(name, |_, _| Ok(Value::Undefined)))
}

// ============================================================================
//  WIRE FORMAT
// ============================================================================

#[tokio::test]
async fn test_sparse_array_and_map_scenario() {
    let map = MapValue::new();
    map.set(Value::from("x"), Value::from(1));
    let sparse = Array::with_slots(vec![Some(Value::from(1)), None, Some(Value::from(3))]);
    let value = Value::object([("a", Value::from(1)), ("b", sparse.into()), ("c", Value::Map(map))]);

    let text = encode(&value, &Registry::new()).await.unwrap();
    assert_eq!(text, r#"[{"a":1,"b":2,"c":4},1,[1,-2,3],3,["Map",5,1],"x"]"#);

    let back = decode(&text, &Registry::new()).unwrap();
    let obj = back.as_object().unwrap();
    assert_eq!(obj.get("a").and_then(|v| v.as_f64()), Some(1.0));

    let b = obj.get("b").unwrap();
    let b = b.as_array().unwrap();
    assert_eq!(b.len(), 3);
    assert!(!b.has(1), "hole must stay absent");
    assert_eq!(b.get(2).and_then(|v| v.as_f64()), Some(3.0));

    match obj.get("c").unwrap() {
        Value::Map(c) => assert_eq!(c.get(&Value::from("x")).and_then(|v| v.as_f64()), Some(1.0)),
        other => panic!("expected a Map, got {:?}", other),
    }
}

#[tokio::test]
async fn test_special_numbers_are_sentinels() {
    let value = Value::array([
        Value::Number(-0.0),
        Value::Number(f64::NAN),
        Value::Number(f64::INFINITY),
        Value::Number(f64::NEG_INFINITY),
        Value::Undefined,
    ]);
    let text = encode(&value, &Registry::new()).await.unwrap();
    assert_eq!(text, "[[-6,-3,-4,-5,-1]]");

    let back = decode(&text, &Registry::new()).unwrap().as_array().unwrap().to_vec();
    let zero = back[0].as_f64().unwrap();
    assert!(zero == 0.0 && zero.is_sign_negative());
    assert!(back[1].as_f64().unwrap().is_nan());
    assert_eq!(back[2].as_f64(), Some(f64::INFINITY));
    assert_eq!(back[3].as_f64(), Some(f64::NEG_INFINITY));
    assert!(back[4].is_undefined());
}

#[tokio::test]
async fn test_bare_sentinel_payloads() {
    assert_eq!(encode(&Value::Undefined, &Registry::new()).await.unwrap(), "-1");
    assert_eq!(encode(&Value::Number(-0.0), &Registry::new()).await.unwrap(), "-6");

    assert!(decode("-1", &Registry::new()).unwrap().is_undefined());
    assert!(decode("-3", &Registry::new()).unwrap().as_f64().unwrap().is_nan());
    assert!(matches!(decode("0", &Registry::new()), Err(Error::Decode(_))));
    assert!(matches!(decode("-2", &Registry::new()), Err(Error::Decode(_))));
}

#[test]
fn test_malformed_payloads() {
    let registry = Registry::new();
    assert!(matches!(decode("", &registry), Err(Error::Decode(_))));
    assert!(matches!(decode("[]", &registry), Err(Error::Decode(_))));
    assert!(matches!(decode("{}", &registry), Err(Error::Decode(_))));
    assert!(matches!(decode("\"x\"", &registry), Err(Error::Decode(_))));
    assert!(matches!(decode("[[7]]", &registry), Err(Error::Decode(_))));
    assert!(matches!(decode(r#"[{"a":"b"}]"#, &registry), Err(Error::Decode(_))));
}

#[test]
fn test_unknown_tag_fails() {
    let registry = Registry::new();
    let err = decode(r#"[["TotallyUnknownTag",0]]"#, &registry).err().unwrap();
    assert!(matches!(&err, Error::UnknownTag(tag) if tag == "TotallyUnknownTag"));
    assert_eq!(err.to_string(), "Unknown type TotallyUnknownTag");

    let err = decode(r#"["TotallyUnknownTag",0]"#, &registry).err().unwrap();
    assert!(matches!(err, Error::UnknownTag(_)));
}

#[tokio::test]
async fn test_string_escaping() {
    let value = Value::from("<\"\\\n\u{2028}\u{1}é");
    let text = encode(&value, &Registry::new()).await.unwrap();
    assert_eq!(text, r#"["\u003C\"\\\n\u2028\u0001é"]"#);
    assert_eq!(decode(&text, &Registry::new()).unwrap().as_str(), Some("<\"\\\n\u{2028}\u{1}é"));
}

#[test]
fn test_number_format() {
    assert_eq!(format_number(1.0), "1");
    assert_eq!(format_number(0.5), "0.5");
    assert_eq!(format_number(-123.25), "-123.25");
    assert_eq!(format_number(1e21), "1e+21");
    assert_eq!(format_number(1.5e300), "1.5e+300");
    assert_eq!(format_number(1e-7), "1e-7");
    assert_eq!(format_number(0.000001), "0.000001");
    assert_eq!(format_number(123456789012345680000.0), "123456789012345680000");
}

#[tokio::test]
async fn test_builtin_scalars() {
    let registry = Registry::new();

    let epoch = Value::Date(Date::from_millis(0.0));
    assert_eq!(encode(&epoch, &registry).await.unwrap(), r#"[["Date","1970-01-01T00:00:00.000Z"]]"#);
    let invalid = encode(&Value::Date(Date::invalid()), &registry).await.unwrap();
    assert_eq!(invalid, r#"[["Date",""]]"#);
    match decode(&invalid, &registry).unwrap() {
        Value::Date(d) => assert!(!d.is_valid()),
        other => panic!("expected a Date, got {:?}", other),
    }

    let re = Value::RegExp(RegExp::new("a+b", "gi"));
    assert_eq!(encode(&re, &registry).await.unwrap(), r#"[["RegExp","a+b","gi"]]"#);
    match decode(r#"[["RegExp","^x$"]]"#, &registry).unwrap() {
        Value::RegExp(r) => assert_eq!((r.source(), r.flags()), ("^x$", "")),
        other => panic!("expected a RegExp, got {:?}", other),
    }

    let big = Value::BigInt(-123_456_789_012_345_678_901_234);
    let text = encode(&big, &registry).await.unwrap();
    assert_eq!(text, r#"[["BigInt","-123456789012345678901234"]]"#);
    assert!(matches!(decode(&text, &registry).unwrap(), Value::BigInt(-123_456_789_012_345_678_901_234)));

    let boxed = Value::Boxed(Boxed::new(Value::Bool(true)).unwrap());
    assert_eq!(encode(&boxed, &registry).await.unwrap(), r#"[["Object",true]]"#);
    match decode(r#"[["Object","s"]]"#, &registry).unwrap() {
        Value::Boxed(b) => assert_eq!(b.value().as_str(), Some("s")),
        other => panic!("expected a boxed string, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bigint_range() {
    let registry = Registry::new();

    for n in [i128::MIN, i128::MAX] {
        let text = encode(&Value::BigInt(n), &registry).await.unwrap();
        assert_eq!(text, format!(r#"[["BigInt","{}"]]"#, n));
        assert!(matches!(decode(&text, &registry).unwrap(), Value::BigInt(m) if m == n));
    }

    // 2^128
    let err = decode(r#"[["BigInt","340282366920938463463374607431768211456"]]"#, &registry).unwrap_err();
    assert!(matches!(err, Error::Shape { ref tag, ref detail } if tag == "BigInt" && detail.contains("128-bit")));
}

#[tokio::test]
async fn test_date_extended_years() {
    let registry = Registry::new();

    for (iso, ms) in [
        ("+010000-01-01T00:00:00.000Z", 253_402_300_800_000),
        ("-000001-01-01T00:00:00.000Z", -62_198_755_200_000),
    ] {
        let text = format!(r#"[["Date","{}"]]"#, iso);
        let date = match decode(&text, &registry).unwrap() {
            Value::Date(d) => d,
            other => panic!("expected a Date, got {:?}", other),
        };
        assert_eq!(date.timestamp_millis(), Some(ms), "{iso}");
        assert_eq!(date.to_iso().as_deref(), Some(iso));
        assert_eq!(encode(&Value::Date(date), &registry).await.unwrap(), text);
    }

    assert_eq!(Date::from_millis(0.0).to_iso().as_deref(), Some("1970-01-01T00:00:00.000Z"));
    assert!(!Date::parse("-000000-01-01T00:00:00.000Z").is_valid());
    assert!(!Date::parse("+10000-01-01T00:00:00.000Z").is_valid());
}

#[tokio::test]
async fn test_boxed_special_numbers() {
    let registry = Registry::new();

    let negative_zero = Value::object([("n", Value::Boxed(Boxed::new(Value::Number(-0.0)).unwrap()))]);
    let text = encode(&negative_zero, &registry).await.unwrap();
    assert_eq!(text, r#"[{"n":1},["Object",-0.0]]"#);
    let back = decode(&text, &registry).unwrap();
    let n = back.as_object().and_then(|o| o.get("n")).unwrap();
    match n {
        Value::Boxed(b) => {
            let inner = b.value().as_f64().unwrap();
            assert_eq!(inner, 0.0);
            assert!(inner.is_sign_negative());
        }
        other => panic!("expected a boxed number, got {:?}", other),
    }

    for special in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let value = Value::object([("n", Value::Boxed(Boxed::new(Value::Number(special)).unwrap()))]);
        let err = encode(&value, &registry).await.unwrap_err();
        assert!(
            matches!(err, Error::Encode { ref message, ref path } if message == "Cannot stringify a boxed non-finite number" && path == ".n"),
            "{special}: {err:?}"
        );
    }

    assert!(matches!(decode(r#"[["Object",null]]"#, &registry), Err(Error::Shape { .. })));
}

#[tokio::test]
async fn test_builtin_binary() {
    let registry = Registry::new();

    let buffer = Value::ArrayBuffer(ArrayBuffer::new(vec![1, 2]));
    assert_eq!(encode(&buffer, &registry).await.unwrap(), r#"[["ArrayBuffer","AQI="]]"#);
    for text in [r#"[["ArrayBuffer","AQI="]]"#, r#"[["ArrayBuffer","AQI"]]"#] {
        match decode(text, &registry).unwrap() {
            Value::ArrayBuffer(b) => assert_eq!(b.as_bytes(), &[1, 2]),
            other => panic!("expected an ArrayBuffer, got {:?}", other),
        }
    }

    // Only the bytes the view covers are written.
    let backing = ArrayBuffer::new(vec![0, 1, 2, 3]);
    let view = TypedArray::new(ViewKind::Uint8, backing, 1, 2).unwrap();
    let text = encode(&Value::View(view), &registry).await.unwrap();
    assert_eq!(text, r#"[["Uint8Array","AQI="]]"#);
    match decode(&text, &registry).unwrap() {
        Value::View(v) => {
            assert_eq!(v.kind(), ViewKind::Uint8);
            assert_eq!(v.as_bytes(), &[1, 2]);
        }
        other => panic!("expected a view, got {:?}", other),
    }

    let data_view = TypedArray::from_bytes(ViewKind::DataView, vec![1]).unwrap();
    let err = encode(&Value::View(data_view), &registry).await.unwrap_err();
    assert!(matches!(err, Error::Encode { .. }));
}

#[tokio::test]
async fn test_null_prototype_object() {
    let obj = Object::with_null_prototype();
    obj.set("a", Value::from(1));
    let text = encode(&Value::Object(obj), &Registry::new()).await.unwrap();
    assert_eq!(text, r#"[["null","a",1],1]"#);

    let back = decode(&text, &Registry::new()).unwrap();
    let back = back.as_object().unwrap();
    assert!(back.has_null_prototype());
    assert_eq!(back.get("a").and_then(|v| v.as_f64()), Some(1.0));
}

// ============================================================================
//  IDENTITY
// ============================================================================

#[tokio::test]
async fn test_shared_reference_decodes_once() {
    let shared = Value::object([("x", Value::from(1))]);
    let root = Value::object([("p", shared.clone()), ("q", shared)]);
    let text = encode(&root, &Registry::new()).await.unwrap();
    assert_eq!(text, r#"[{"p":1,"q":1},{"x":2},1]"#);

    let back = decode(&text, &Registry::new()).unwrap();
    let back = back.as_object().unwrap();
    assert!(back.get("p").unwrap().ptr_eq(&back.get("q").unwrap()));
}

#[tokio::test]
async fn test_cycles() {
    let obj = Object::new();
    obj.set("me", Value::Object(obj.clone()));
    let text = encode(&Value::Object(obj), &Registry::new()).await.unwrap();
    assert_eq!(text, r#"[{"me":0}]"#);

    let back = decode(&text, &Registry::new()).unwrap();
    assert!(back.as_object().unwrap().get("me").unwrap().ptr_eq(&back));

    let array = Array::new();
    array.push(Value::Array(array.clone()));
    let back = roundtrip(&Value::Array(array), &Registry::new()).await;
    assert!(back.as_array().unwrap().get(0).unwrap().ptr_eq(&back));

    let set = SetValue::new();
    set.add(Value::Set(set.clone()));
    let back = roundtrip(&Value::Set(set), &Registry::new()).await;
    match &back {
        Value::Set(s) => assert!(s.values()[0].ptr_eq(&back)),
        other => panic!("expected a Set, got {:?}", other),
    }
}

#[test]
fn test_cycle_through_reviver_fails() {
    let registry = Registry::new().with(handler("Wrap", |_| None, Ok)).unwrap();
    let err = decode(r#"[["Wrap",0]]"#, &registry).err().unwrap();
    assert!(matches!(err, Error::Decode(_)));
}

// ============================================================================
//  ENCODE ERRORS
// ============================================================================

#[tokio::test]
async fn test_function_error_carries_path() {
    let value = Value::object([("foo", Value::object([("bar", noop("f"))]))]);
    let err = encode(&value, &Registry::new()).await.unwrap_err();
    match &err {
        Error::Encode { message, path } => {
            assert_eq!(message, "Cannot stringify a function");
            assert_eq!(path, ".foo.bar");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.to_string().contains(".foo.bar"));
}

#[tokio::test]
async fn test_error_paths_for_keys_slots_and_maps() {
    let value = Value::object([("a b", Value::array([Value::Null, noop("f")]))]);
    let err = encode(&value, &Registry::new()).await.unwrap_err();
    assert!(matches!(err, Error::Encode { ref path, .. } if path == r#"["a b"][1]"#));

    let map = MapValue::new();
    map.set(Value::from("k"), noop("f"));
    let err = encode(&Value::Map(map), &Registry::new()).await.unwrap_err();
    assert!(matches!(err, Error::Encode { ref path, .. } if path == r#".get("k")"#));

    let top = encode(&noop("f"), &Registry::new()).await.unwrap_err();
    assert_eq!(top.to_string(), "Cannot stringify a function");
}

#[tokio::test]
async fn test_symbol_keys_and_non_plain_values_fail() {
    let obj = Object::new();
    obj.set_symbol("tag", Value::from(1));
    let err = encode(&Value::Object(obj), &Registry::new()).await.unwrap_err();
    assert!(matches!(err, Error::Encode { ref message, .. } if message == "Cannot stringify POJOs with symbolic keys"));

    struct Secret;
    let value = Value::object([("s", Value::Opaque(Opaque::new(Secret)))]);
    let err = encode(&value, &Registry::new()).await.unwrap_err();
    assert!(matches!(err, Error::Encode { ref message, ref path } if message == "Cannot stringify arbitrary non-POJOs" && path == ".s"));

    let err = encode(&Value::Error(ErrorValue::new("Error", "x")), &Registry::new()).await.unwrap_err();
    assert!(matches!(err, Error::Encode { .. }));
}

// ============================================================================
//  REGISTRY
// ============================================================================

#[derive(Debug, PartialEq)]
struct Point(f64, f64);

fn point_handler() -> std::sync::Arc<dyn Handler> {
    handler(
        "Point",
        |value| match value {
            Value::Opaque(o) => o.downcast_ref::<Point>().map(|p| Value::array([Value::from(p.0), Value::from(p.1)])),
            _ => None,
        },
        |value| {
            let items = value.as_array().map(Array::to_vec).unwrap_or_default();
            match items.as_slice() {
                [Value::Number(x), Value::Number(y)] => Ok(Value::Opaque(Opaque::new(Point(*x, *y)))),
                _ => Err(Error::shape("Point", "expected [x, y]")),
            }
        },
    )
}

#[tokio::test]
async fn test_reducer_override() {
    let registry = Registry::new().with(point_handler()).unwrap();
    let value = Value::Opaque(Opaque::new(Point(1.0, 2.5)));

    let text = encode(&value, &registry).await.unwrap();
    assert_eq!(text, r#"[["Point",1],[2,3],1,2.5]"#);

    match decode(&text, &registry).unwrap() {
        Value::Opaque(o) => assert_eq!(o.downcast_ref::<Point>(), Some(&Point(1.0, 2.5))),
        other => panic!("expected a Point, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reducer_precedes_builtin() {
    let registry = Registry::new()
        .with(handler(
            "Upper",
            |value| value.as_str().filter(|s| s.starts_with('!')).map(|s| Value::from(s.to_uppercase())),
            Ok,
        ))
        .unwrap();
    let text = encode(&Value::array([Value::from("!hi"), Value::from("lo")]), &registry).await.unwrap();
    assert_eq!(text, r#"[[1,3],["Upper",2],"!HI","lo"]"#);
}

#[test]
fn test_duplicate_tag_rejected() {
    let mut registry = Registry::standard();
    let err = registry.register(handler("Error", |_| None, Ok)).unwrap_err();
    assert!(matches!(err, Error::DuplicateTag(ref tag) if tag == "Error"));

    let mut registry = Registry::new();
    registry.register(point_handler()).unwrap();
    assert!(registry.register(point_handler()).is_err());
    assert_eq!(registry.tags(), vec!["Point"]);
}

#[test]
fn test_standard_order() {
    let registry = Registry::standard();
    assert_eq!(
        registry.tags(),
        vec![
            "ReadableStream",
            "Blob",
            "ArrayBuffer",
            "ArrayBufferView",
            "Error",
            "Headers",
            "Request",
            "Response",
            "InternalClass",
            "PreComputableClassMethod",
        ]
    );
}

// ============================================================================
//  FAMILIES
// ============================================================================

#[tokio::test]
async fn test_error_family() {
    let registry = Registry::standard();
    let cause = Value::from("root cause");
    let error = ErrorValue::with_details("TypeError", "boom", Some("at f".into()), Some(cause));

    match roundtrip(&Value::Error(error), &registry).await {
        Value::Error(e) => {
            assert_eq!(e.name(), "TypeError");
            assert_eq!(e.message(), "boom");
            assert_eq!(e.stack(), Some("at f"));
            assert_eq!(e.cause().and_then(|c| c.as_str()), Some("root cause"));
        }
        other => panic!("expected an Error, got {:?}", other),
    }

    match roundtrip(&Value::Error(ErrorValue::new("DatabaseError", "down")), &registry).await {
        Value::Error(e) => {
            assert_eq!(e.name(), "Error");
            assert_eq!(e.message(), "down");
            assert!(e.stack().is_none());
        }
        other => panic!("expected an Error, got {:?}", other),
    }

    let forged = r#"[["Error",1],[2,3,-1,-1],"Function","x"]"#;
    assert!(matches!(decode(forged, &registry), Err(Error::Shape { .. })));
}

#[tokio::test]
async fn test_buffer_family_keeps_shared_buffers() {
    let registry = Registry::standard();
    let buffer = ArrayBuffer::new(vec![0u8; 8]);
    let low = TypedArray::new(ViewKind::Int16, buffer.clone(), 0, 2).unwrap();
    let high = TypedArray::new(ViewKind::Uint32, buffer, 4, 1).unwrap();

    let back = roundtrip(&Value::array([Value::View(low), Value::View(high)]), &registry).await;
    let items = back.as_array().unwrap().to_vec();
    let (Value::View(low), Value::View(high)) = (&items[0], &items[1]) else {
        panic!("expected two views, got {:?}", items);
    };
    assert_eq!((low.kind(), low.len(), low.byte_offset()), (ViewKind::Int16, 2, 0));
    assert_eq!((high.kind(), high.len(), high.byte_offset()), (ViewKind::Uint32, 1, 4));
    assert!(Value::ArrayBuffer(low.buffer().clone()).ptr_eq(&Value::ArrayBuffer(high.buffer().clone())));

    let forged = r#"[["ArrayBufferView",1],[2,3,4,4],"Function",["ArrayBuffer",5],0,[6],"AAAA"]"#;
    assert!(decode(forged, &registry).is_err());
}

#[tokio::test]
async fn test_http_family() {
    let registry = Registry::standard();
    let headers = Headers::from_pairs([("Content-Type", "text/plain"), ("X-Tag", "a"), ("x-tag", "b")]);
    let request = Request::new(
        "POST",
        "https://example.com/upload",
        headers,
        Value::object([("colo", Value::from("AMS"))]),
        Some(ByteStream::from_bytes(&b"payload"[..])),
    );

    let back = roundtrip(&Value::Request(request), &registry).await;
    let Value::Request(request) = back else {
        panic!("expected a Request, got {:?}", back);
    };
    assert_eq!(request.method(), "POST");
    assert_eq!(request.url(), "https://example.com/upload");
    assert_eq!(request.headers().get("content-type").as_deref(), Some("text/plain"));
    assert_eq!(request.headers().get("x-tag").as_deref(), Some("a, b"));
    assert_eq!(request.cf().as_object().and_then(|cf| cf.get("colo")).and_then(|v| v.as_str().map(String::from)), Some("AMS".to_string()));
    assert_eq!(request.body().unwrap().read_all().await.unwrap(), b"payload");

    let response = Response::new(404, "Not Found", Headers::new(), Value::Undefined, None);
    match roundtrip(&Value::Response(response), &registry).await {
        Value::Response(r) => {
            assert_eq!((r.status(), r.status_text()), (404, "Not Found"));
            assert!(r.body().is_none());
        }
        other => panic!("expected a Response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_family() {
    let registry = Registry::standard();
    let chunks = futures::stream::iter(vec![
        Ok(bytes::Bytes::from_static(b"hello ")),
        Ok(bytes::Bytes::from_static(b"world")),
    ]);
    let stream = ByteStream::new(chunks);

    let value = Value::Stream(stream.clone());
    match roundtrip(&value, &registry).await {
        Value::Stream(s) => assert_eq!(s.read_all().await.unwrap(), b"hello world"),
        other => panic!("expected a stream, got {:?}", other),
    }

    assert!(stream.is_consumed());
    assert!(matches!(encode(&value, &registry).await, Err(Error::Stream(_))));
}

#[tokio::test]
async fn test_blob_and_file() {
    let registry = Registry::standard();

    match roundtrip(&Value::Blob(Blob::new(&b"abc"[..], "text/plain")), &registry).await {
        Value::Blob(b) => {
            assert_eq!(b.data().as_ref(), b"abc");
            assert_eq!(b.mime_type(), "text/plain");
            assert!(b.file_info().is_none());
        }
        other => panic!("expected a Blob, got {:?}", other),
    }

    match roundtrip(&Value::Blob(Blob::file(&b"x"[..], "", "notes.txt", 1700000000000.0)), &registry).await {
        Value::Blob(b) => {
            let file = b.file_info().unwrap();
            assert_eq!(file.name, "notes.txt");
            assert_eq!(file.last_modified, 1700000000000.0);
            assert_eq!(b.mime_type(), "");
        }
        other => panic!("expected a File, got {:?}", other),
    }
}

fn get_result() -> PlatformObject {
    let write_metadata = Function::sync("writeHttpMetadata", |this, args| {
        let Value::Platform(me) = this else {
            return Err(Error::throw("TypeError", "unbound"));
        };
        let content_type = me.fields().get("contentType").unwrap_or_default();
        match (args.first(), content_type) {
            (Some(Value::Headers(h)), Value::String(ct)) => h.set("content-type", ct),
            _ => return Err(Error::throw("TypeError", "bad call")),
        }
        Ok(Value::Undefined)
    });
    PlatformObject::builder("GetResult")
        .internal()
        .field("key", Value::from("a.json"))
        .field("contentType", Value::from("application/json"))
        .method("writeHttpMetadata", write_metadata)
        .body(ByteStream::from_bytes(&br#"{"n":[1,2]}"#[..]))
        .build()
}

#[tokio::test]
async fn test_platform_family() {
    let registry = Registry::standard();
    let back = roundtrip(&Value::Platform(get_result()), &registry).await;
    let Value::Platform(object) = back else {
        panic!("expected a platform object, got {:?}", back);
    };
    assert_eq!(object.class(), "GetResult");
    assert!(object.is_internal());
    assert_eq!(object.fields().get("key").and_then(|k| k.as_str().map(String::from)), Some("a.json".into()));

    // The snapshot replays into any Headers it is given.
    let replay = object.fields().get("writeHttpMetadata").unwrap();
    let headers = Headers::new();
    replay.as_function().unwrap().call(vec![Value::Headers(headers.clone())]).await.unwrap();
    assert_eq!(headers.get("content-type").as_deref(), Some("application/json"));

    let json = object.method("json").unwrap().call(Vec::new()).await.unwrap();
    let n = json.as_object().unwrap().get("n").unwrap();
    assert_eq!(n.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_checksums_snapshot() {
    let registry = Registry::standard();
    let checksums = PlatformObject::builder("Checksums")
        .internal()
        .method("toJSON", Function::sync("toJSON", |_, _| Ok(Value::object([("md5", Value::from("abc"))]))))
        .build();

    let back = roundtrip(&Value::Platform(checksums), &registry).await;
    let Value::Platform(object) = back else {
        panic!("expected a platform object, got {:?}", back);
    };
    let to_json = object.fields().get("toJSON").unwrap();
    let snapshot = to_json.as_function().unwrap().call(Vec::new()).await.unwrap();
    assert_eq!(snapshot.as_object().unwrap().get("md5").unwrap().as_str(), Some("abc"));
}

#[tokio::test]
async fn test_platform_objects_need_internal_flag() {
    let plain = PlatformObject::builder("Thing").field("a", Value::from(1)).build();
    let err = encode(&Value::Platform(plain), &Registry::standard()).await.unwrap_err();
    assert!(matches!(err, Error::Encode { .. }));

    // Methods outside the snapshot allow-list have no wire form.
    let other = PlatformObject::builder("R2Object")
        .internal()
        .method("writeHttpMetadata", Function::sync("writeHttpMetadata", |_, _| Ok(Value::Undefined)))
        .build();
    let err = encode(&Value::Platform(other), &Registry::standard()).await.unwrap_err();
    assert!(matches!(err, Error::Encode { ref path, .. } if path == "[1].writeHttpMetadata"));
}
