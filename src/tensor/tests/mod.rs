mod ops_tests;
