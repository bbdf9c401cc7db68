//! Integration tests for the in-process memory transport.

#[cfg(feature = "memory")]
mod memory {
    use sockline_transport::memory;
    use sockline_transport::{Target, Transport, TransportError, TransportFactory};
    use url::Url;

    fn target() -> Target {
        Target::new(Url::parse("http://localhost:3000/?token=abc").unwrap(), 1)
    }

    #[tokio::test]
    async fn test_memory_frames_flow_both_ways() {
        let (factory, mut listener) = memory::channel("memory");
        let mut transport = factory.create(&target());

        transport.open().await.expect("should open");
        let mut peer = listener.accept().await.expect("peer should appear");
        assert_eq!(
            peer.url(),
            "http://localhost:3000/socket.io/1/memory/?token=abc"
        );

        transport.send("1::").await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("1::"));

        peer.send("sid:60:60:memory").unwrap();
        assert_eq!(
            transport.recv().await.unwrap().as_deref(),
            Some("sid:60:60:memory")
        );
    }

    #[tokio::test]
    async fn test_memory_open_fails_without_listener() {
        let (factory, listener) = memory::channel("memory");
        drop(listener);

        let mut transport = factory.create(&target());
        assert!(matches!(
            transport.open().await,
            Err(TransportError::OpenFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_dropping_peer_closes_transport() {
        let (factory, mut listener) = memory::channel("memory");
        let mut transport = factory.create(&target());
        transport.open().await.unwrap();

        let peer = listener.accept().await.unwrap();
        drop(peer);

        assert!(transport.recv().await.unwrap().is_none());
        assert!(transport.send("2::").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_close_is_seen_by_peer() {
        let (factory, mut listener) = memory::channel("memory");
        let mut transport = factory.create(&target());
        transport.open().await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        transport.close().await.unwrap();
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_each_open_yields_a_new_peer() {
        let (factory, mut listener) = memory::channel("memory");
        for _ in 0..3 {
            let mut transport = factory.create(&target());
            transport.open().await.unwrap();
        }
        let mut count = 0;
        while listener.try_accept().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(factory.name(), "memory");
    }
}
