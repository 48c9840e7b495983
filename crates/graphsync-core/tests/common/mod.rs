pub mod mock_graph;
